//! Windows SCM 服务支持
//!
//! 通过 `sc.exe` 安装/卸载服务。服务命令行由当前生效的配置生成，
//! 服务启动时以 `--service` 进入周期检查循环。

use tracing::{info, warn};

use crate::common::command::{CommandRunner, ToolOutput};
use crate::common::error::{Result, SwitchError};
use crate::config::PolicyConfig;

pub const SERVICE_NAME: &str = "ProxySwitchService";
pub const SERVICE_DISPLAY_NAME: &str = "Proxy Switch Configuration Service";
pub const SERVICE_DESCRIPTION: &str =
    "Enables the system proxy on the configured network or for the configured users";

/// 服务配置
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub binary_path: String,
    pub start_type: ServiceStartType,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServiceStartType {
    Auto,
    Manual,
    Disabled,
}

impl ServiceStartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStartType::Auto => "auto",
            ServiceStartType::Manual => "demand",
            ServiceStartType::Disabled => "disabled",
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: SERVICE_NAME.to_string(),
            display_name: SERVICE_DISPLAY_NAME.to_string(),
            description: SERVICE_DESCRIPTION.to_string(),
            binary_path: std::env::current_exe()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            start_type: ServiceStartType::Auto,
        }
    }
}

impl ServiceConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_binary_path(mut self, path: &str) -> Self {
        self.binary_path = path.to_string();
        self
    }

    /// 服务持久化的命令行参数
    pub fn service_args(policy: &PolicyConfig) -> Vec<String> {
        let mut args = vec![
            "--service".to_string(),
            format!("--mode={}", policy.mode),
            format!("--gateway={}", policy.target_gateway),
            format!("--proxy={}", policy.proxy_server),
            format!("--override=\"{}\"", policy.proxy_override),
        ];
        if let Some(ref full) = policy.full_username {
            args.push(format!("--fullname=\"{}\"", full));
        }
        if let Some(ref find) = policy.partial_username {
            args.push(format!("--findname=\"{}\"", find));
        }
        if !policy.allowed_usernames.is_empty() {
            args.push(format!("--allowed=\"{}\"", policy.allowed_usernames.join(",")));
        }
        args.push(format!("--interval={}", policy.interval.as_secs()));
        args.push(format!("--timeout={}", policy.probe_timeout.as_secs()));
        if let Some(ref path) = policy.log_file {
            args.push(format!("--log-file=\"{}\"", path.display()));
        }
        args
    }

    /// `binPath=` 的值：带引号的可执行文件路径加服务参数
    pub fn bin_path(&self, policy: &PolicyConfig) -> String {
        let mut bin = format!("\"{}\"", self.binary_path);
        for arg in Self::service_args(policy) {
            bin.push(' ');
            bin.push_str(&arg);
        }
        bin
    }

    /// `sc create` 的参数
    pub fn create_args(&self, policy: &PolicyConfig) -> Vec<String> {
        vec![
            "create".to_string(),
            self.name.clone(),
            "binPath=".to_string(),
            self.bin_path(policy),
            "DisplayName=".to_string(),
            self.display_name.clone(),
            "start=".to_string(),
            self.start_type.as_str().to_string(),
        ]
    }

    /// 创建并启动服务
    pub async fn install(&self, runner: &dyn CommandRunner, policy: &PolicyConfig) -> Result<ServiceStatus> {
        policy.validate_for_install()?;

        let create = self.create_args(policy);
        let create: Vec<&str> = create.iter().map(String::as_str).collect();
        sc(runner, &create).await?;

        if let Err(e) = sc(runner, &["description", self.name.as_str(), self.description.as_str()]).await {
            warn!(service = %self.name, error = %e, "failed to set service description");
        }

        sc(runner, &["start", self.name.as_str()]).await?;
        info!(service = %self.name, config = %policy.summary(), "service installed");

        Ok(self.query_status(runner).await)
    }

    /// 停止（忽略失败）并删除服务
    pub async fn uninstall(&self, runner: &dyn CommandRunner) -> Result<()> {
        if let Err(e) = sc(runner, &["stop", self.name.as_str()]).await {
            warn!(service = %self.name, error = %e, "stop before delete failed");
        }
        sc(runner, &["delete", self.name.as_str()]).await?;
        info!(service = %self.name, "service removed");
        Ok(())
    }

    pub async fn query_status(&self, runner: &dyn CommandRunner) -> ServiceStatus {
        match sc(runner, &["query", self.name.as_str()]).await {
            Ok(out) => ServiceStatus::from_str(&out.stdout),
            Err(_) => ServiceStatus::Unknown,
        }
    }
}

/// sc.exe 把错误写到 stdout，失败时两路输出都带上
async fn sc(runner: &dyn CommandRunner, args: &[&str]) -> Result<ToolOutput> {
    let out = runner.run("sc", args).await?;
    if out.success {
        return Ok(out);
    }
    let action = args.first().copied().unwrap_or("");
    Err(SwitchError::tool_invocation(
        "sc",
        format!(
            "sc {} exited with {:?}: {} {}",
            action,
            out.code,
            out.stdout.trim(),
            out.stderr.trim()
        ),
    ))
}

/// 服务状态
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceStatus {
    Running,
    Stopped,
    Paused,
    StartPending,
    StopPending,
    Unknown,
}

impl ServiceStatus {
    pub fn from_str(s: &str) -> Self {
        let s = s.to_uppercase();
        if s.contains("START_PENDING") {
            ServiceStatus::StartPending
        } else if s.contains("STOP_PENDING") {
            ServiceStatus::StopPending
        } else if s.contains("RUNNING") {
            ServiceStatus::Running
        } else if s.contains("STOPPED") {
            ServiceStatus::Stopped
        } else if s.contains("PAUSED") {
            ServiceStatus::Paused
        } else {
            ServiceStatus::Unknown
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }
}
