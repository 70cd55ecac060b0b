//! Turns live gateway/user state into a single enable/disable decision.
//!
//! Stateless: every call re-derives the answer from the probes. A probe that
//! cannot determine its answer is an error, never a silent `false`.

use std::net::Ipv4Addr;

use tracing::{info, warn};

use crate::common::error::Result;
use crate::config::{CheckMode, PolicyConfig, UserMatch};
use crate::probe::{GatewayLocator, GatewayProbe, IdentityChecker, UserCheck};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCheck {
    pub target: Ipv4Addr,
    pub probe: GatewayProbe,
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub mode: CheckMode,
    pub enable: bool,
    pub gateway: Option<GatewayCheck>,
    pub user: Option<UserCheck>,
}

impl Decision {
    pub fn reason(&self) -> &'static str {
        match self.mode {
            CheckMode::Gateway => "gateway check",
            CheckMode::User => "user check",
            CheckMode::Both => "both gateway and user check",
        }
    }
}

pub struct PolicyEvaluator {
    locator: GatewayLocator,
    identity: IdentityChecker,
}

impl PolicyEvaluator {
    pub fn new(locator: GatewayLocator, identity: IdentityChecker) -> Self {
        Self { locator, identity }
    }

    pub fn identity(&self) -> &IdentityChecker {
        &self.identity
    }

    pub async fn check_gateway(&self, target: Ipv4Addr) -> Result<GatewayCheck> {
        let probe = self.locator.probe().await?;
        let matched = probe.contains(target);
        info!(
            target = %target,
            found = %probe,
            confidence = %probe.confidence(),
            matched,
            "gateway check"
        );
        Ok(GatewayCheck {
            target,
            probe,
            matched,
        })
    }

    pub async fn check_user(&self, rule: &UserMatch) -> Result<UserCheck> {
        let check = self.identity.check(rule).await?;
        info!(
            identity = %check.identity,
            expected = %check.expectation,
            matched = check.matched,
            "user check"
        );
        Ok(check)
    }

    pub async fn should_enable_proxy(&self, config: &PolicyConfig) -> Result<bool> {
        Ok(self.evaluate(config).await?.enable)
    }

    /// Run the checks `config.mode` asks for.
    ///
    /// In `Both` mode both checks always run, even when the first one already
    /// settles the result, so the log shows which half failed.
    pub async fn evaluate(&self, config: &PolicyConfig) -> Result<Decision> {
        let gateway = if config.mode.checks_gateway() {
            Some(self.check_gateway(config.target_gateway).await)
        } else {
            None
        };
        let user = if config.mode.checks_user() {
            Some(self.check_user(&config.user_match()).await)
        } else {
            None
        };

        if let Some(Err(ref e)) = gateway {
            warn!(error_kind = e.kind().as_str(), error = %e, "could not determine gateway");
        }
        if let Some(Err(ref e)) = user {
            warn!(error_kind = e.kind().as_str(), error = %e, "could not determine user");
        }

        let gateway = gateway.transpose()?;
        let user = user.transpose()?;

        let enable = gateway.as_ref().map_or(true, |g| g.matched)
            && user.as_ref().map_or(true, |u| u.matched);

        Ok(Decision {
            mode: config.mode,
            enable,
            gateway,
            user,
        })
    }
}
