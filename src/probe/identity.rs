//! Current-user identity and username matching.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::common::error::{Result, SwitchError};
use crate::config::UserMatch;

#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// The account this process runs as, in the OS's own `DOMAIN\user` form.
    async fn current_identity(&self) -> Result<String>;
}

/// The account of the process token.
///
/// Windows: `GetUserNameExW(NameSamCompatible)`, e.g. `CORP\alice`, or
/// `NT AUTHORITY\SYSTEM` under the service account. Elsewhere the environment
/// is the only source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl SystemIdentity {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IdentitySource for SystemIdentity {
    async fn current_identity(&self) -> Result<String> {
        #[cfg(windows)]
        {
            token_identity()
        }
        #[cfg(not(windows))]
        {
            identity_from_env(|key| std::env::var(key).ok())
                .ok_or_else(|| SwitchError::NotFound("USER is not set".to_string()))
        }
    }
}

#[cfg(windows)]
fn token_identity() -> Result<String> {
    use windows::core::PWSTR;
    use windows::Win32::Security::Authentication::Identity::{GetUserNameExW, NameSamCompatible};

    // domain (15) + backslash + user (256) + NUL
    let mut size: u32 = 273;
    for _ in 0..2 {
        let mut buf = vec![0u16; size as usize];
        let ok = unsafe { GetUserNameExW(NameSamCompatible, PWSTR(buf.as_mut_ptr()), &mut size) };
        if ok.as_bool() {
            buf.truncate(size as usize);
            return Ok(String::from_utf16_lossy(&buf));
        }
        // ERROR_MORE_DATA leaves the required length in `size`
        if size as usize <= buf.len() {
            break;
        }
    }
    Err(SwitchError::NotFound(format!(
        "GetUserNameExW: {}",
        windows::core::Error::from_win32()
    )))
}

/// Domain-qualified name when a domain is known, bare name otherwise.
#[cfg_attr(windows, allow(dead_code))]
fn identity_from_env<F>(get: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let user = get("USERNAME")
        .or_else(|| get("USER"))
        .filter(|u| !u.is_empty())?;
    match get("USERDOMAIN").filter(|d| !d.is_empty()) {
        Some(domain) => Some(format!("{}\\{}", domain, user)),
        None => Some(user),
    }
}

/// Outcome of one username check, kept for logging and the test report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCheck {
    pub identity: String,
    pub expectation: String,
    pub matched: bool,
}

pub struct IdentityChecker {
    source: Arc<dyn IdentitySource>,
}

impl IdentityChecker {
    pub fn new(source: Arc<dyn IdentitySource>) -> Self {
        Self { source }
    }

    pub async fn current_identity(&self) -> Result<String> {
        self.source.current_identity().await
    }

    pub async fn check(&self, rule: &UserMatch) -> Result<UserCheck> {
        let identity = self.source.current_identity().await?;
        info!(identity = %identity, "current username");
        Ok(evaluate(&identity, rule))
    }
}

/// Match `identity` against `rule`, logging both sides of every comparison.
pub fn evaluate(identity: &str, rule: &UserMatch) -> UserCheck {
    let (matched, expectation) = match rule {
        UserMatch::Unset => {
            info!(identity = %identity, "no username criteria configured, user check fails");
            (false, "<none>".to_string())
        }
        UserMatch::Names { full, partial } => {
            let mut matched = false;
            let mut expected = Vec::new();
            if let Some(full) = full {
                let ok = matches_exact(identity, full);
                if ok {
                    info!(identity = %identity, expected = %full, "full username match");
                } else {
                    info!(identity = %identity, expected = %full, "full username does not match");
                }
                matched |= ok;
                expected.push(format!("full={}", full));
            }
            if let Some(partial) = partial {
                let ok = matches_partial(identity, partial);
                if ok {
                    info!(identity = %identity, fragment = %partial, "partial username match");
                } else {
                    info!(identity = %identity, fragment = %partial, "partial username not found");
                }
                matched |= ok;
                expected.push(format!("contains={}", partial));
            }
            (matched, expected.join(" or "))
        }
        UserMatch::AllowList(allowed) => {
            let ok = matches_allow_list(identity, allowed);
            let list = allowed.join(",");
            if ok {
                info!(identity = %identity, allowed = %list, "username is in allowed list");
            } else {
                info!(identity = %identity, allowed = %list, "username is not in allowed list");
            }
            (ok, format!("one of [{}]", list))
        }
    };

    UserCheck {
        identity: identity.to_string(),
        expectation,
        matched,
    }
}

pub fn matches_exact(identity: &str, expected: &str) -> bool {
    identity == expected
}

pub fn matches_partial(identity: &str, fragment: &str) -> bool {
    identity.contains(fragment)
}

pub fn matches_allow_list<S: AsRef<str>>(identity: &str, allowed: &[S]) -> bool {
    allowed.iter().any(|entry| entry.as_ref().trim() == identity)
}
