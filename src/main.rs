use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use proxyswitch::app::log_file;
use proxyswitch::app::service::ServiceConfig;
use proxyswitch::app::{Engine, Runner, TestReport};
use proxyswitch::common::SystemCommandRunner;
use proxyswitch::config::{self, types::parse_allow_list, ConfigLayer, PolicyConfig};

const EXAMPLES: &str = r#"Examples:
  # Check by gateway only (default)
  proxyswitch --install --gateway=192.168.0.1
  # Check by exact username
  proxyswitch --install --mode=user --fullname=DOMAIN\username
  # Check by partial username
  proxyswitch --install --mode=user --findname=admin
  # Check against a list of users
  proxyswitch --install --mode=user --allowed="admin,user1"
  # Check by both gateway and username
  proxyswitch --install --mode=both --gateway=192.168.1.1 --findname=user
  # Test current username without changing anything
  proxyswitch --test --mode=user --fullname=DOMAIN\username"#;

/// Sc.exe calls are quick; this only guards against a wedged SCM.
const SC_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(
    name = "proxyswitch",
    version,
    about = "Enables the Windows system proxy on a given network or for given users",
    after_help = EXAMPLES
)]
struct Cli {
    /// Install as Windows service
    #[arg(long, group = "action")]
    install: bool,
    /// Remove Windows service
    #[arg(long, group = "action")]
    uninstall: bool,
    /// Run as service (for internal use)
    #[arg(long, group = "action")]
    service: bool,
    /// Test mode: evaluate and report, change nothing (default)
    #[arg(long, group = "action")]
    test: bool,

    /// YAML file with configuration defaults; flags override it
    #[arg(long, value_name = "PATH")]
    config: Option<String>,
    /// Check mode: gateway, user, or both [default: gateway]
    #[arg(long)]
    mode: Option<String>,
    /// Target gateway IP [default: 192.168.1.1]
    #[arg(long)]
    gateway: Option<String>,
    /// Proxy server address:port [default: 10.0.66.52:3128]
    #[arg(long)]
    proxy: Option<String>,
    /// Proxy override list [default: 192.168.*.*;192.25.*.*;<local>]
    #[arg(long = "override", value_name = "LIST")]
    proxy_override: Option<String>,
    /// Exact username match (requires full match)
    #[arg(long)]
    fullname: Option<String>,
    /// Partial username match (contains text)
    #[arg(long)]
    findname: Option<String>,
    /// Comma-separated list of allowed usernames
    #[arg(long, value_name = "LIST")]
    allowed: Option<String>,
    /// Seconds between checks in service mode [default: 60]
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,
    /// Seconds before a system tool call is abandoned [default: 30]
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    /// Service log file [default: %TEMP%\proxyswitch.log]
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            mode: self.mode.clone(),
            gateway: self.gateway.clone(),
            proxy: self.proxy.clone(),
            proxy_override: self.proxy_override.clone(),
            full_name: self.fullname.clone(),
            find_name: self.findname.clone(),
            allowed_users: self.allowed.as_deref().map(parse_allow_list),
            interval_secs: self.interval,
            timeout_secs: self.timeout,
            log_file: self.log_file.clone(),
        }
    }

    fn policy(&self) -> Result<PolicyConfig> {
        let mut layers = Vec::new();
        if let Some(ref path) = self.config {
            layers.push(config::load_layer(path)?);
        }
        layers.push(self.layer());
        config::build_config(&layers)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.service {
        return run_service(&cli).await;
    }

    log_file::init_console_logging("warn");
    let policy = cli.policy()?;

    if cli.install {
        install(&policy).await
    } else if cli.uninstall {
        uninstall().await
    } else {
        run_test(policy).await
    }
}

async fn run_service(cli: &Cli) -> Result<()> {
    // Config problems must reach the log too, so logging comes first.
    let log_path = cli
        .log_file
        .clone()
        .or_else(|| cli.policy().ok().and_then(|p| p.log_file));
    let log_path = log_file::init_file_logging(log_path.as_deref())?;

    let policy = match cli.policy() {
        Ok(policy) => policy,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "invalid service configuration");
            return Err(e);
        }
    };

    info!(log = %log_path.display(), "proxy switch service started");
    info!(config = %policy.summary(), interval_secs = policy.interval.as_secs(), "service configuration");
    if policy.mode.checks_user() && !policy.has_user_criteria() {
        warn!(mode = %policy.mode, "no username criteria configured, proxy will always be disabled");
    }

    let engine = Engine::system(Arc::new(policy))?;
    let runner = Runner::new(engine);

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    runner.run(cancel).await;
    info!("proxy switch service stopped");
    Ok(())
}

async fn run_test(policy: PolicyConfig) -> Result<()> {
    let engine = Engine::system(Arc::new(policy))?;
    let report = TestReport::collect(&engine).await;
    println!("{}", report);
    Ok(())
}

async fn install(policy: &PolicyConfig) -> Result<()> {
    let runner = SystemCommandRunner::new(SC_TIMEOUT);
    let service = ServiceConfig::default();
    let status = service
        .install(&runner, policy)
        .await
        .with_context(|| format!("installing service '{}'", service.name))?;

    println!(
        "Service '{}' installed successfully with configuration:",
        service.name
    );
    println!("  Mode: {}", policy.mode);
    if policy.mode.checks_gateway() {
        println!("  Gateway: {}", policy.target_gateway);
    }
    if policy.mode.checks_user() {
        if let Some(ref full) = policy.full_username {
            println!("  Full username: {}", full);
        }
        if let Some(ref find) = policy.partial_username {
            println!("  Find username: {}", find);
        }
        if !policy.allowed_usernames.is_empty() {
            println!("  Allowed usernames: {}", policy.allowed_usernames.join(","));
        }
    }
    println!("  Proxy: {}", policy.proxy_server);
    println!("  Override: {}", policy.proxy_override);
    println!("  Interval: {}s", policy.interval.as_secs());
    println!("  State: {:?}", status);
    Ok(())
}

async fn uninstall() -> Result<()> {
    let runner = SystemCommandRunner::new(SC_TIMEOUT);
    let service = ServiceConfig::default();
    service
        .uninstall(&runner)
        .await
        .with_context(|| format!("removing service '{}'", service.name))?;
    println!("Service '{}' uninstalled successfully", service.name);
    Ok(())
}
