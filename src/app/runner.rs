use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::common::command::{CommandRunner, SystemCommandRunner};
use crate::common::error::{Result, SwitchError};
use crate::config::PolicyConfig;
use crate::probe::{GatewayLocator, IdentityChecker, SystemIdentity};

use super::policy::PolicyEvaluator;
use super::system_proxy::{ApplyPlan, ProxyApplier, RegistryStore};

/// Result of one evaluate-and-apply cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    Applied(ApplyPlan),
    /// Conditions could not be determined; nothing was written.
    Skipped(SwitchError),
    ApplyFailed { plan: ApplyPlan, error: SwitchError },
}

impl CycleOutcome {
    pub fn plan(&self) -> Option<&ApplyPlan> {
        match self {
            CycleOutcome::Applied(plan) | CycleOutcome::ApplyFailed { plan, .. } => Some(plan),
            CycleOutcome::Skipped(_) => None,
        }
    }
}

/// The decision engine: policy evaluation plus proxy application, shared by
/// service mode and test mode.
pub struct Engine {
    config: Arc<PolicyConfig>,
    evaluator: PolicyEvaluator,
    applier: ProxyApplier,
}

impl Engine {
    pub fn new(config: Arc<PolicyConfig>, evaluator: PolicyEvaluator, applier: ProxyApplier) -> Self {
        Self {
            config,
            evaluator,
            applier,
        }
    }

    /// Wire the engine to the real OS tools.
    pub fn system(config: Arc<PolicyConfig>) -> Result<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new(config.probe_timeout));
        let locator = GatewayLocator::new(runner.clone())?;
        let identity = IdentityChecker::new(Arc::new(SystemIdentity::new()));
        let applier = ProxyApplier::new(Arc::new(RegistryStore::new(runner)));
        Ok(Self::new(config, PolicyEvaluator::new(locator, identity), applier))
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &PolicyEvaluator {
        &self.evaluator
    }

    pub fn applier(&self) -> &ProxyApplier {
        &self.applier
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        let config = self.config.as_ref();
        info!(config = %config.summary(), "checking conditions");

        match self.applier.read_state().await {
            Ok(state) => info!(current = %state, "current proxy settings"),
            Err(e) => warn!(error = %e, "could not read current proxy settings"),
        }

        let decision = match self.evaluator.evaluate(config).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(
                    error_kind = e.kind().as_str(),
                    error = %e,
                    "error checking conditions, leaving proxy settings unchanged"
                );
                return CycleOutcome::Skipped(e);
            }
        };

        if decision.enable {
            info!(reason = decision.reason(), "conditions met, enabling proxy");
        } else {
            info!(reason = decision.reason(), "conditions not met, disabling proxy");
        }

        let plan = self.applier.plan(decision.enable, config);
        match self.applier.execute(&plan).await {
            Ok(()) => CycleOutcome::Applied(plan),
            Err(e) => {
                error!(enable = plan.enable, error = %e, "error applying proxy settings");
                CycleOutcome::ApplyFailed { plan, error: e }
            }
        }
    }
}

/// Runs one cycle immediately, then one per interval until cancelled.
///
/// A cycle always finishes before the next one starts; late ticks are delayed,
/// not bunched up.
pub struct Runner {
    engine: Engine,
    interval: Duration,
}

impl Runner {
    pub fn new(engine: Engine) -> Self {
        let interval = engine.config().interval;
        Self { engine, interval }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cycles: u64 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(cycles, "stop requested, scheduler exiting");
                    break;
                }
                _ = ticker.tick() => {
                    cycles += 1;
                    self.engine.run_cycle().await;
                }
            }
        }
    }
}
