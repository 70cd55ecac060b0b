//! Test mode: run every read the service would run, print the decision and
//! the exact writes that would follow, change nothing.

use std::fmt;

use crate::common::error::SwitchError;
use crate::config::PolicyConfig;

use super::policy::Decision;
use super::runner::Engine;
use super::system_proxy::{ApplyPlan, ProxyState};

pub struct TestReport {
    pub config: PolicyConfig,
    pub identity: Result<String, SwitchError>,
    pub decision: Result<Decision, SwitchError>,
    /// What service mode would write for this decision.
    pub plan: Option<ApplyPlan>,
    pub current: Result<ProxyState, SwitchError>,
}

impl TestReport {
    pub async fn collect(engine: &Engine) -> Self {
        let config = engine.config().clone();
        let identity = engine.evaluator().identity().current_identity().await;
        let decision = engine.evaluator().evaluate(&config).await;
        let plan = decision
            .as_ref()
            .ok()
            .map(|d| engine.applier().plan(d.enable, &config));
        let current = engine.applier().read_state().await;

        Self {
            config,
            identity,
            decision,
            plan,
            current,
        }
    }

    /// `Some(true)` would enable, `Some(false)` would disable, `None` cannot
    /// determine.
    pub fn would_enable(&self) -> Option<bool> {
        self.plan.as_ref().map(|p| p.enable)
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cfg = &self.config;
        writeln!(f, "=== Proxy Switch Test Mode ===")?;
        writeln!(f, "Check mode: {}", cfg.mode)?;
        if cfg.mode.checks_gateway() {
            writeln!(f, "Target gateway: {}", cfg.target_gateway)?;
        }
        if cfg.mode.checks_user() {
            if let Some(ref full) = cfg.full_username {
                writeln!(f, "Full username: {}", full)?;
            }
            if let Some(ref find) = cfg.partial_username {
                writeln!(f, "Find username: {}", find)?;
            }
            if !cfg.allowed_usernames.is_empty() {
                writeln!(f, "Allowed usernames: {}", cfg.allowed_usernames.join(","))?;
            }
            if !cfg.has_user_criteria() {
                writeln!(f, "Warning: no username criteria set, user check always fails")?;
            }
        }
        writeln!(f, "Proxy server: {}", cfg.proxy_server)?;
        writeln!(f, "Proxy override: {}", cfg.proxy_override)?;
        writeln!(f)?;

        writeln!(f, "Checking conditions...")?;
        match &self.identity {
            Ok(name) => writeln!(f, "Current username: {}", name)?,
            Err(e) => writeln!(f, "Error getting username: {}", e)?,
        }

        match &self.decision {
            Ok(decision) => {
                if let Some(ref gw) = decision.gateway {
                    writeln!(
                        f,
                        "Gateway: found {} -> target {} {}",
                        gw.probe,
                        gw.target,
                        if gw.matched { "matched" } else { "not matched" }
                    )?;
                }
                if let Some(ref user) = decision.user {
                    writeln!(
                        f,
                        "User: {} vs {} -> {}",
                        user.identity,
                        user.expectation,
                        if user.matched { "matched" } else { "not matched" }
                    )?;
                }
                if decision.enable {
                    writeln!(f, "✓ Conditions met ({})", decision.reason())?;
                    writeln!(f, "Result: WOULD ENABLE PROXY")?;
                } else {
                    writeln!(f, "✗ Conditions not met ({})", decision.reason())?;
                    writeln!(f, "Result: WOULD DISABLE PROXY")?;
                }
            }
            Err(e) => {
                writeln!(f, "Error checking conditions [{}]: {}", e.kind().as_str(), e)?;
                writeln!(f, "Result: CANNOT DETERMINE (service would leave settings unchanged)")?;
            }
        }

        if let Some(ref plan) = self.plan {
            writeln!(f, "Service would write:")?;
            for write in &plan.writes {
                writeln!(f, "  {}", write)?;
            }
        }
        writeln!(f)?;

        match &self.current {
            Ok(state) => writeln!(f, "Current proxy settings: {}", state)?,
            Err(e) => writeln!(f, "Error reading current proxy settings: {}", e)?,
        }
        writeln!(f)?;
        writeln!(f, "Note: This is a test. No changes were made to system settings.")?;
        write!(f, "Use --install to install the service for actual operation.")
    }
}
