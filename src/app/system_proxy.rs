//! Windows 系统代理开关
//!
//! 读写 `HKCU\...\Internet Settings` 中的 `ProxyEnable` / `ProxyServer` /
//! `ProxyOverride`，通过 `reg.exe` 命令行工具避免额外依赖。
//! 写入后广播设置变更，让已运行的进程重新读取代理配置。
//!
//! 每个周期都会无条件写入（不做变更检测），以便纠正其他工具对注册表的改动。

use std::fmt;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::common::command::{CommandRunner, ToolOutput};
use crate::common::error::{Result, SwitchError};
use crate::config::PolicyConfig;

pub const PROXY_ENABLE: &str = "ProxyEnable";
pub const PROXY_SERVER: &str = "ProxyServer";
pub const PROXY_OVERRIDE: &str = "ProxyOverride";

const INTERNET_SETTINGS_KEY: &str =
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Internet Settings";

// reg query 输出格式: "    ProxyEnable    REG_DWORD    0x1"
static REG_VALUE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\S+)\s+(REG_DWORD|REG_SZ|REG_EXPAND_SZ)(?:\s+(.*?))?\s*$")
        .expect("reg query row pattern")
});

/// 代理设置存储（每用户，单字段读写，无跨字段原子性）
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// `Ok(None)` 表示值不存在
    async fn read_dword(&self, name: &str) -> Result<Option<u32>>;
    async fn read_string(&self, name: &str) -> Result<Option<String>>;
    async fn write_dword(&self, name: &str, value: u32) -> Result<()>;
    async fn write_string(&self, name: &str, value: &str) -> Result<()>;
    /// 通知系统刷新每用户设置（fire-and-forget）
    async fn broadcast_change(&self) -> Result<()>;
}

/// 当前代理状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyState {
    pub enabled: bool,
    pub server: String,
    pub override_list: String,
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.enabled { "ENABLED" } else { "DISABLED" };
        write!(f, "{} ({})", status, self.server)
    }
}

/// 单次注册表写入
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingWrite {
    Enable(bool),
    Server(String),
    Override(String),
}

impl fmt::Display for SettingWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingWrite::Enable(on) => write!(f, "{}={}", PROXY_ENABLE, u32::from(*on)),
            SettingWrite::Server(s) => write!(f, "{}={}", PROXY_SERVER, s),
            SettingWrite::Override(s) => write!(f, "{}={}", PROXY_OVERRIDE, s),
        }
    }
}

/// 某个决策对应的全部写入，测试模式打印、服务模式执行，两者共用同一份计划。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyPlan {
    pub enable: bool,
    pub writes: Vec<SettingWrite>,
}

impl ApplyPlan {
    /// 关闭时只清 `ProxyEnable`，保留旧的 server/override，再次开启只需翻转标志位。
    pub fn for_decision(enable: bool, config: &PolicyConfig) -> Self {
        let mut writes = vec![SettingWrite::Enable(enable)];
        if enable {
            writes.push(SettingWrite::Server(config.proxy_server.clone()));
            writes.push(SettingWrite::Override(config.proxy_override.clone()));
        }
        Self { enable, writes }
    }
}

pub struct ProxyApplier {
    store: Arc<dyn SettingsStore>,
}

impl ProxyApplier {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// 读取当前系统代理状态；缺少 server/override 时按空串处理
    pub async fn read_state(&self) -> Result<ProxyState> {
        let enabled = self
            .store
            .read_dword(PROXY_ENABLE)
            .await?
            .ok_or_else(|| SwitchError::StoreAccess(format!("{} is not set", PROXY_ENABLE)))?;
        let server = self.store.read_string(PROXY_SERVER).await?.unwrap_or_default();
        let override_list = self
            .store
            .read_string(PROXY_OVERRIDE)
            .await?
            .unwrap_or_default();

        Ok(ProxyState {
            enabled: enabled == 1,
            server,
            override_list,
        })
    }

    pub fn plan(&self, enable: bool, config: &PolicyConfig) -> ApplyPlan {
        ApplyPlan::for_decision(enable, config)
    }

    /// 无条件写入决策结果并广播变更
    pub async fn apply(&self, enable: bool, config: &PolicyConfig) -> Result<ApplyPlan> {
        let plan = self.plan(enable, config);
        self.execute(&plan).await?;
        Ok(plan)
    }

    /// 按顺序写入；某一项失败时停止，但已写入的部分仍会广播后再返回错误。
    pub async fn execute(&self, plan: &ApplyPlan) -> Result<()> {
        let mut written = 0;
        let mut failed = None;
        for write in &plan.writes {
            debug!(write = %write, "writing proxy setting");
            let result = match write {
                SettingWrite::Enable(on) => self.store.write_dword(PROXY_ENABLE, u32::from(*on)).await,
                SettingWrite::Server(s) => self.store.write_string(PROXY_SERVER, s).await,
                SettingWrite::Override(s) => self.store.write_string(PROXY_OVERRIDE, s).await,
            };
            if let Err(e) = result {
                failed = Some(e);
                break;
            }
            written += 1;
        }

        if written > 0 {
            if let Err(e) = self.store.broadcast_change().await {
                warn!(error = %e, "proxy settings written but change notification failed");
            }
        }
        if let Some(e) = failed {
            warn!(written, total = plan.writes.len(), "proxy settings only partly written");
            return Err(e);
        }

        if plan.enable {
            info!(writes = plan.writes.len(), "proxy enabled");
        } else {
            info!("proxy disabled");
        }
        Ok(())
    }
}

// ─── 注册表操作（通过 reg.exe）──────────────────────────────────────

pub struct RegistryStore {
    runner: Arc<dyn CommandRunner>,
}

impl RegistryStore {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn reg(&self, args: &[&str]) -> Result<ToolOutput> {
        self.runner
            .run("reg", args)
            .await
            .map_err(|e| SwitchError::StoreAccess(format!("reg.exe failed: {}", e)))
    }

    async fn query(&self, name: &str) -> Result<Option<String>> {
        let output = self.reg(&["query", INTERNET_SETTINGS_KEY, "/v", name]).await?;
        if !output.success {
            debug!(value = name, stderr = %output.stderr.trim(), "reg query found nothing");
            return Ok(None);
        }
        Ok(parse_reg_query(&output.stdout, name).map(|(_, data)| data))
    }

    async fn add(&self, name: &str, kind: &str, data: &str) -> Result<()> {
        let output = self
            .reg(&["add", INTERNET_SETTINGS_KEY, "/v", name, "/t", kind, "/d", data, "/f"])
            .await?;
        if output.success {
            Ok(())
        } else {
            Err(SwitchError::StoreAccess(format!(
                "reg add {} failed: {}",
                name,
                output.stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl SettingsStore for RegistryStore {
    async fn read_dword(&self, name: &str) -> Result<Option<u32>> {
        let Some(raw) = self.query(name).await? else {
            return Ok(None);
        };
        let hex = raw.trim().trim_start_matches("0x");
        u32::from_str_radix(hex, 16)
            .map(Some)
            .map_err(|_| SwitchError::parse("reg", format!("{} is not a DWORD: {}", name, raw)))
    }

    async fn read_string(&self, name: &str) -> Result<Option<String>> {
        self.query(name).await
    }

    async fn write_dword(&self, name: &str, value: u32) -> Result<()> {
        self.add(name, "REG_DWORD", &value.to_string()).await
    }

    async fn write_string(&self, name: &str, value: &str) -> Result<()> {
        self.add(name, "REG_SZ", value).await
    }

    /// 让已运行的进程无需注销即可读到新的每用户设置
    async fn broadcast_change(&self) -> Result<()> {
        self.runner
            .run("rundll32", &["user32.dll,UpdatePerUserSystemParameters"])
            .await?
            .into_success("rundll32")?;
        Ok(())
    }
}

/// 从 `reg query` 输出中找到指定值，返回 (类型, 数据)
fn parse_reg_query(stdout: &str, name: &str) -> Option<(String, String)> {
    stdout.lines().find_map(|line| {
        let caps = REG_VALUE_ROW.captures(line)?;
        if !caps[1].eq_ignore_ascii_case(name) {
            return None;
        }
        let data = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        Some((caps[2].to_string(), data.to_string()))
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// 测试
// ═══════════════════════════════════════════════════════════════════════════
