pub mod log_file;
pub mod policy;
pub mod report;
pub mod runner;
pub mod service;
pub mod system_proxy;

pub use policy::{Decision, GatewayCheck, PolicyEvaluator};
pub use report::TestReport;
pub use runner::{CycleOutcome, Engine, Runner};
pub use system_proxy::{ApplyPlan, ProxyApplier, ProxyState, SettingWrite, SettingsStore};
