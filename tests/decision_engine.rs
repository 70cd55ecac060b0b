/// Decision engine integration tests.
///
/// Drives the public API end to end with scripted OS tools:
///   route/netsh output + identity → PolicyEvaluator → ApplyPlan → settings store
///
/// Test mode and service mode must agree: the plan printed by the report is
/// exactly what a service cycle writes.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use proxyswitch::app::system_proxy::{PROXY_ENABLE, PROXY_OVERRIDE, PROXY_SERVER};
use proxyswitch::app::{
    CycleOutcome, Engine, PolicyEvaluator, ProxyApplier, SettingWrite, SettingsStore, TestReport,
};
use proxyswitch::common::{CommandRunner, Result, SwitchError, SwitchErrorKind, ToolOutput};
use proxyswitch::config::{self, CheckMode, PolicyConfig};
use proxyswitch::probe::{GatewayLocator, IdentityChecker, IdentitySource};

const ROUTE_HOME: &str = "\
===========================================================================
IPv4 Route Table
===========================================================================
Active Routes:
Network Destination        Netmask          Gateway       Interface  Metric
          0.0.0.0          0.0.0.0      192.168.1.1    192.168.1.23     25
        127.0.0.0        255.0.0.0         On-link         127.0.0.1    331
===========================================================================
";

const ROUTE_ELSEWHERE: &str = "\
Active Routes:
Network Destination        Netmask          Gateway       Interface  Metric
          0.0.0.0          0.0.0.0         10.1.0.1       10.1.0.77     35
";

const NETSH_HOME: &str = "\
Configuration for interface \"Ethernet\"
    DHCP enabled:                         Yes
    IP Address:                           192.168.1.23
    Default Gateway:                      192.168.1.1
    Gateway Metric:                       0
";

/// Answers `route` and `netsh` from fixed text; `None` makes the tool fail.
struct FakeTools {
    route: Option<&'static str>,
    netsh: Option<&'static str>,
}

#[async_trait]
impl CommandRunner for FakeTools {
    async fn run(&self, program: &str, _args: &[&str]) -> Result<ToolOutput> {
        let out = match program {
            "route" => self.route,
            "netsh" => self.netsh,
            _ => None,
        };
        match out {
            Some(stdout) => Ok(ToolOutput {
                success: true,
                code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
            None => Err(SwitchError::tool_invocation(program, "not available")),
        }
    }
}

struct FixedIdentity(Option<&'static str>);

#[async_trait]
impl IdentitySource for FixedIdentity {
    async fn current_identity(&self) -> Result<String> {
        self.0
            .map(str::to_string)
            .ok_or_else(|| SwitchError::NotFound("username".to_string()))
    }
}

#[derive(Default)]
struct Settings {
    dwords: Mutex<HashMap<String, u32>>,
    strings: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<String>>,
}

impl Settings {
    fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SettingsStore for Settings {
    async fn read_dword(&self, name: &str) -> Result<Option<u32>> {
        Ok(self.dwords.lock().unwrap().get(name).copied())
    }

    async fn read_string(&self, name: &str) -> Result<Option<String>> {
        Ok(self.strings.lock().unwrap().get(name).cloned())
    }

    async fn write_dword(&self, name: &str, value: u32) -> Result<()> {
        self.writes.lock().unwrap().push(format!("{}={}", name, value));
        self.dwords.lock().unwrap().insert(name.to_string(), value);
        Ok(())
    }

    async fn write_string(&self, name: &str, value: &str) -> Result<()> {
        self.writes.lock().unwrap().push(format!("{}={}", name, value));
        self.strings
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn broadcast_change(&self) -> Result<()> {
        Ok(())
    }
}

fn engine(
    config: PolicyConfig,
    tools: FakeTools,
    identity: Option<&'static str>,
    store: Arc<Settings>,
) -> Engine {
    let locator = GatewayLocator::new(Arc::new(tools)).unwrap();
    let identity = IdentityChecker::new(Arc::new(FixedIdentity(identity)));
    Engine::new(
        Arc::new(config),
        PolicyEvaluator::new(locator, identity),
        ProxyApplier::new(store),
    )
}

fn home_tools() -> FakeTools {
    FakeTools {
        route: Some(ROUTE_HOME),
        netsh: Some(NETSH_HOME),
    }
}

fn policy(yaml: &str) -> PolicyConfig {
    config::build_config(&[config::parse_layer(yaml).unwrap()]).unwrap()
}

// ─── 网关模式 ───

#[tokio::test]
async fn gateway_match_enables_and_reads_back() {
    let store = Arc::new(Settings::default());
    let engine = engine(policy(""), home_tools(), Some("CORP\\bob"), store.clone());

    let outcome = engine.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Applied(ref p) if p.enable));

    let state = engine.applier().read_state().await.unwrap();
    assert!(state.enabled);
    assert_eq!(state.server, "10.0.66.52:3128");
    assert_eq!(state.override_list, "192.168.*.*;192.25.*.*;<local>");
}

#[tokio::test]
async fn other_network_disables_and_keeps_server() {
    let store = Arc::new(Settings::default());
    let tools = FakeTools {
        route: Some(ROUTE_ELSEWHERE),
        netsh: None,
    };
    let engine = engine(policy(""), tools, None, store.clone());
    store
        .strings
        .lock()
        .unwrap()
        .insert(PROXY_SERVER.to_string(), "old.proxy:8080".to_string());

    let outcome = engine.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Applied(ref p) if !p.enable));
    assert_eq!(store.writes(), vec![format!("{}=0", PROXY_ENABLE)]);

    let state = engine.applier().read_state().await.unwrap();
    assert!(!state.enabled);
    assert_eq!(state.server, "old.proxy:8080");
}

#[tokio::test]
async fn route_failure_falls_back_to_interface_config() {
    let store = Arc::new(Settings::default());
    let tools = FakeTools {
        route: None,
        netsh: Some(NETSH_HOME),
    };
    let engine = engine(policy(""), tools, None, store.clone());

    let decision = engine.evaluator().evaluate(engine.config()).await.unwrap();
    assert!(decision.enable);
    let gw = decision.gateway.unwrap();
    assert!(gw.matched);
    assert!(gw.probe.contains(Ipv4Addr::new(192, 168, 1, 1)));
}

#[tokio::test]
async fn no_gateway_information_leaves_settings_untouched() {
    let store = Arc::new(Settings::default());
    let tools = FakeTools {
        route: None,
        netsh: None,
    };
    let engine = engine(policy(""), tools, None, store.clone());

    let outcome = engine.run_cycle().await;
    match outcome {
        CycleOutcome::Skipped(e) => assert_eq!(e.kind(), SwitchErrorKind::ToolInvocation),
        other => panic!("expected skipped cycle, got {:?}", other),
    }
    assert!(store.writes().is_empty());
}

// ─── 用户模式 ───

#[tokio::test]
async fn allow_list_match_is_case_sensitive() {
    let config = policy("mode: user\nallowed_users: [\"admin\", \" user1 \"]\n");

    let store = Arc::new(Settings::default());
    let listed = engine(config.clone(), home_tools(), Some("user1"), store.clone());
    let outcome = listed.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Applied(ref p) if p.enable));

    let store = Arc::new(Settings::default());
    let shouting = engine(config, home_tools(), Some("USER1"), store.clone());
    let outcome = shouting.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Applied(ref p) if !p.enable));
}

#[tokio::test]
async fn partial_name_miss_disables() {
    let store = Arc::new(Settings::default());
    let config = policy("mode: user\nfind_name: admin\n");
    let engine = engine(config, home_tools(), Some("CORP\\bob"), store.clone());

    let outcome = engine.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::Applied(ref p) if !p.enable));
}

#[tokio::test]
async fn user_mode_without_criteria_always_disables() {
    let store = Arc::new(Settings::default());
    let config = policy("mode: user\n");
    let engine = engine(config, home_tools(), Some("CORP\\bob"), store.clone());

    let decision = engine.evaluator().evaluate(engine.config()).await.unwrap();
    assert!(!decision.enable);
}

// ─── 组合模式 ───

#[tokio::test]
async fn both_mode_requires_both_conditions() {
    let store = Arc::new(Settings::default());
    let config = policy("mode: both\nfull_name: CORP\\alice\n");

    let wrong_user = engine(config.clone(), home_tools(), Some("CORP\\bob"), store.clone());
    let decision = wrong_user.evaluator().evaluate(wrong_user.config()).await.unwrap();
    assert!(!decision.enable);
    assert!(decision.gateway.as_ref().unwrap().matched);
    assert!(!decision.user.as_ref().unwrap().matched);

    let right_user = engine(config, home_tools(), Some("CORP\\alice"), store);
    assert!(right_user
        .evaluator()
        .should_enable_proxy(right_user.config())
        .await
        .unwrap());
}

#[tokio::test]
async fn both_mode_propagates_identity_failure() {
    let store = Arc::new(Settings::default());
    let config = policy("mode: both\nfind_name: alice\n");
    let engine = engine(config, home_tools(), None, store.clone());

    let outcome = engine.run_cycle().await;
    match outcome {
        CycleOutcome::Skipped(e) => assert_eq!(e.kind(), SwitchErrorKind::NotFound),
        other => panic!("expected skipped cycle, got {:?}", other),
    }
    assert!(store.writes().is_empty());
}

// ─── 测试模式与服务模式一致 ───

#[tokio::test]
async fn report_plan_matches_service_writes() {
    for (config, identity) in [
        (policy(""), Some("CORP\\bob")),
        (policy("mode: user\nfull_name: CORP\\alice\n"), Some("CORP\\bob")),
        (policy("mode: both\nfind_name: ali\n"), Some("CORP\\alice")),
    ] {
        let report_store = Arc::new(Settings::default());
        let report_engine = engine(config.clone(), home_tools(), identity, report_store.clone());
        let report = TestReport::collect(&report_engine).await;
        assert!(report_store.writes().is_empty(), "test mode must not write");

        let service_store = Arc::new(Settings::default());
        let service_engine = engine(config, home_tools(), identity, service_store.clone());
        let outcome = service_engine.run_cycle().await;

        assert_eq!(report.plan.as_ref(), outcome.plan());
        let expected: Vec<String> = report
            .plan
            .as_ref()
            .unwrap()
            .writes
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(service_store.writes(), expected);
    }
}

#[tokio::test]
async fn report_text_describes_decision() {
    let store = Arc::new(Settings::default());
    let engine = engine(policy(""), home_tools(), Some("CORP\\bob"), store);
    let report = TestReport::collect(&engine).await;
    assert_eq!(report.would_enable(), Some(true));

    let text = report.to_string();
    assert!(text.contains("Result: WOULD ENABLE PROXY"));
    assert!(text.contains(&format!("  {}", SettingWrite::Enable(true))));
    assert!(text.contains(&format!("{}=192.168.*.*;192.25.*.*;<local>", PROXY_OVERRIDE)));
    assert!(text.contains("No changes were made"));
}

#[tokio::test]
async fn report_without_gateway_cannot_determine() {
    let store = Arc::new(Settings::default());
    let tools = FakeTools {
        route: None,
        netsh: None,
    };
    let config = PolicyConfig {
        mode: CheckMode::Gateway,
        ..Default::default()
    };
    let report = TestReport::collect(&engine(config, tools, Some("x"), store)).await;
    assert_eq!(report.would_enable(), None);
    assert!(report.to_string().contains("CANNOT DETERMINE"));
}
