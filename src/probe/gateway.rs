//! Default gateway discovery.
//!
//! Windows exposes routing state only as localized, version-dependent text, so
//! discovery is a list of [`GatewayStrategy`] values tried in order. The first
//! strategy that produces an answer wins:
//!
//! 1. [`RouteTableStrategy`]: `route print -4`, the `0.0.0.0/0.0.0.0` row.
//!    Yields one address, the agreed default route.
//! 2. [`InterfaceConfigStrategy`]: `netsh interface ip show config`, every
//!    "Default Gateway" label in any known display language. Yields the set of
//!    gateways of all adapters, which is a weaker signal than (1).
//!
//! Results are never cached; every call re-runs the tools.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::common::command::CommandRunner;
use crate::common::error::{Result, SwitchError};

const DOTTED_QUAD: &str = r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})";

/// `0.0.0.0  0.0.0.0  <gateway>` with a numeric gateway; `On-link` default
/// rows (VPN adapters) are skipped.
static DEFAULT_ROUTE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^\s*0\.0\.0\.0\s+0\.0\.0\.0\s+{}(?:\s+.*)?$", DOTTED_QUAD))
        .expect("default route pattern")
});

/// "Default Gateway" as printed by netsh in the display languages seen in the
/// field. New locales only need a new entry here.
pub const DEFAULT_GATEWAY_LABELS: &[&str] = &[
    "Default Gateway",
    "Основной шлюз",
    "Шлюз, используемый по умолчанию",
    "Standardgateway",
    "默认网关",
];

/// What a gateway probe found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayProbe {
    /// The single default route from the routing table.
    Default(Ipv4Addr),
    /// Gateways reported by any adapter; several may be active at once.
    Candidates(BTreeSet<Ipv4Addr>),
}

/// How much a positive match on a probe result can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeConfidence {
    /// Target is the routing table's default route.
    DefaultRoute,
    /// Target is configured on some adapter, not necessarily the one in use.
    AnyAdapter,
}

impl fmt::Display for ProbeConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeConfidence::DefaultRoute => write!(f, "default-route"),
            ProbeConfidence::AnyAdapter => write!(f, "any-adapter"),
        }
    }
}

impl GatewayProbe {
    /// Whether `target` counts as the active gateway.
    ///
    /// For [`GatewayProbe::Candidates`] this is set membership, which is more
    /// permissive than the exact default-route comparison.
    pub fn contains(&self, target: Ipv4Addr) -> bool {
        match self {
            GatewayProbe::Default(gw) => *gw == target,
            GatewayProbe::Candidates(set) => set.contains(&target),
        }
    }

    pub fn confidence(&self) -> ProbeConfidence {
        match self {
            GatewayProbe::Default(_) => ProbeConfidence::DefaultRoute,
            GatewayProbe::Candidates(_) => ProbeConfidence::AnyAdapter,
        }
    }

    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        match self {
            GatewayProbe::Default(gw) => vec![*gw],
            GatewayProbe::Candidates(set) => set.iter().copied().collect(),
        }
    }
}

impl fmt::Display for GatewayProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addrs: Vec<String> = self.addresses().iter().map(|a| a.to_string()).collect();
        write!(f, "{} ({})", addrs.join(","), self.confidence())
    }
}

/// One way of asking the OS for its gateway.
pub trait GatewayStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Program and arguments to run.
    fn command(&self) -> (&'static str, &'static [&'static str]);

    fn parse(&self, stdout: &str) -> Result<GatewayProbe>;
}

/// Parses `route print -4`.
#[derive(Debug, Default)]
pub struct RouteTableStrategy;

impl RouteTableStrategy {
    pub fn parse_default_gateway(stdout: &str) -> Result<Ipv4Addr> {
        let Some(token) = stdout
            .lines()
            .find_map(|line| DEFAULT_ROUTE_ROW.captures(line))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
        else {
            return Err(SwitchError::NotFound(
                "no default route with a numeric gateway in routing table".to_string(),
            ));
        };

        token
            .parse::<Ipv4Addr>()
            .map_err(|_| SwitchError::parse("route", format!("invalid gateway IP: {}", token)))
    }
}

impl GatewayStrategy for RouteTableStrategy {
    fn name(&self) -> &'static str {
        "route-table"
    }

    fn command(&self) -> (&'static str, &'static [&'static str]) {
        ("route", &["print", "-4"])
    }

    fn parse(&self, stdout: &str) -> Result<GatewayProbe> {
        Self::parse_default_gateway(stdout).map(GatewayProbe::Default)
    }
}

/// Parses `netsh interface ip show config`, matching every known label.
#[derive(Debug)]
pub struct InterfaceConfigStrategy {
    patterns: Vec<Regex>,
}

impl InterfaceConfigStrategy {
    pub fn new() -> Result<Self> {
        Self::with_labels(DEFAULT_GATEWAY_LABELS)
    }

    pub fn with_labels(labels: &[&str]) -> Result<Self> {
        let mut strategy = Self {
            patterns: Vec::with_capacity(labels.len()),
        };
        for label in labels {
            strategy.add_label(label)?;
        }
        Ok(strategy)
    }

    /// Recognize one more localized "Default Gateway" label.
    pub fn add_label(&mut self, label: &str) -> Result<()> {
        let pattern = format!(r"{}[\. ]*:\s*{}", regex::escape(label), DOTTED_QUAD);
        let re = Regex::new(&pattern)
            .map_err(|e| SwitchError::Configuration(format!("gateway label '{}': {}", label, e)))?;
        self.patterns.push(re);
        Ok(())
    }

    pub fn parse_gateways(&self, stdout: &str) -> Result<BTreeSet<Ipv4Addr>> {
        let mut gateways = BTreeSet::new();
        for line in stdout.lines() {
            for pattern in &self.patterns {
                let Some(value) = pattern.captures(line).and_then(|c| c.get(1)) else {
                    continue;
                };
                match value.as_str().parse::<Ipv4Addr>() {
                    // 0.0.0.0 means the adapter has no gateway assigned
                    Ok(ip) if ip.is_unspecified() => {}
                    Ok(ip) => {
                        gateways.insert(ip);
                    }
                    Err(_) => debug!(value = value.as_str(), "skipping malformed gateway value"),
                }
            }
        }

        if gateways.is_empty() {
            return Err(SwitchError::NotFound(
                "no active gateways in interface configuration".to_string(),
            ));
        }
        Ok(gateways)
    }
}

impl GatewayStrategy for InterfaceConfigStrategy {
    fn name(&self) -> &'static str {
        "interface-config"
    }

    fn command(&self) -> (&'static str, &'static [&'static str]) {
        ("netsh", &["interface", "ip", "show", "config"])
    }

    fn parse(&self, stdout: &str) -> Result<GatewayProbe> {
        self.parse_gateways(stdout).map(GatewayProbe::Candidates)
    }
}

pub struct GatewayLocator {
    runner: Arc<dyn CommandRunner>,
    strategies: Vec<Box<dyn GatewayStrategy>>,
}

impl GatewayLocator {
    /// Route table first, interface configuration as fallback.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Result<Self> {
        Ok(Self::with_strategies(
            runner,
            vec![
                Box::new(RouteTableStrategy),
                Box::new(InterfaceConfigStrategy::new()?),
            ],
        ))
    }

    pub fn with_strategies(
        runner: Arc<dyn CommandRunner>,
        strategies: Vec<Box<dyn GatewayStrategy>>,
    ) -> Self {
        Self { runner, strategies }
    }

    /// Try every strategy in order and return the first result.
    ///
    /// Earlier failures are logged; if all fail, the last error is returned.
    pub async fn probe(&self) -> Result<GatewayProbe> {
        let mut last_err = SwitchError::NotFound("no gateway strategies configured".to_string());
        for strategy in &self.strategies {
            match self.run_strategy(strategy.as_ref()).await {
                Ok(probe) => {
                    debug!(strategy = strategy.name(), result = %probe, "gateway probe succeeded");
                    return Ok(probe);
                }
                Err(e) => {
                    warn!(
                        strategy = strategy.name(),
                        error_kind = e.kind().as_str(),
                        error = %e,
                        "gateway probe failed"
                    );
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// The routing table's default gateway only, no fallback.
    pub async fn locate_default_gateway(&self) -> Result<Ipv4Addr> {
        let output = self.run_tool(&RouteTableStrategy).await?;
        RouteTableStrategy::parse_default_gateway(&output)
    }

    /// Gateways of every adapter, from the interface configuration only.
    pub async fn locate_active_gateways(&self) -> Result<BTreeSet<Ipv4Addr>> {
        let strategy = InterfaceConfigStrategy::new()?;
        let output = self.run_tool(&strategy).await?;
        strategy.parse_gateways(&output)
    }

    async fn run_strategy(&self, strategy: &dyn GatewayStrategy) -> Result<GatewayProbe> {
        let output = self.run_tool(strategy).await?;
        strategy.parse(&output)
    }

    async fn run_tool(&self, strategy: &dyn GatewayStrategy) -> Result<String> {
        let (program, args) = strategy.command();
        let output = self.runner.run(program, args).await?.into_success(program)?;
        Ok(output.stdout)
    }
}
