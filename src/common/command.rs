//! External tool invocation.
//!
//! Every OS query (`route`, `netsh`, `reg`, `sc`, `rundll32`) goes through
//! [`CommandRunner`], so the decision engine can be driven by scripted output
//! in tests and every call is bounded by a timeout in production.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::error::{Result, SwitchError};

/// Captured result of a finished tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Treat a non-zero exit as a tool invocation failure.
    pub fn into_success(self, tool: &str) -> Result<ToolOutput> {
        if self.success {
            return Ok(self);
        }
        let reason = match self.code {
            Some(code) => format!("exit code {}: {}", code, self.stderr.trim()),
            None => format!("terminated by signal: {}", self.stderr.trim()),
        };
        Err(SwitchError::tool_invocation(tool, reason))
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and collect its output.
    ///
    /// Errors only when the process cannot be spawned or does not finish in
    /// time; a non-zero exit is reported through [`ToolOutput::success`].
    async fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput>;
}

/// Runs real processes via tokio, each bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(SwitchError::tool_invocation(program, e)),
            Err(_) => {
                return Err(SwitchError::ToolTimeout {
                    tool: program.to_string(),
                    timeout: self.timeout,
                })
            }
        };

        debug!(
            tool = program,
            code = ?output.status.code(),
            stdout_len = output.stdout.len(),
            "tool finished"
        );

        Ok(ToolOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: decode_output(&output.stdout),
            stderr: decode_output(&output.stderr),
        })
    }
}

/// Console tools print in the console codepage (866 on Russian Windows), so
/// anything that is not valid UTF-8 is decoded with that codepage.
pub fn decode_output(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    #[cfg(windows)]
    {
        if let Some(text) = codepage::decode(bytes, codepage::console_output()) {
            return text;
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(windows)]
mod codepage {
    use windows::Win32::Globalization::{GetOEMCP, MultiByteToWideChar, MULTI_BYTE_TO_WIDE_CHAR_FLAGS};
    use windows::Win32::System::Console::GetConsoleOutputCP;

    /// Codepage a child console process writes in; services have no console
    /// and get the OEM default.
    pub fn console_output() -> u32 {
        match unsafe { GetConsoleOutputCP() } {
            0 => unsafe { GetOEMCP() },
            cp => cp,
        }
    }

    pub fn decode(bytes: &[u8], codepage: u32) -> Option<String> {
        let flags = MULTI_BYTE_TO_WIDE_CHAR_FLAGS(0);
        let len = unsafe { MultiByteToWideChar(codepage, flags, bytes, None) };
        if len <= 0 {
            return None;
        }
        let mut wide = vec![0u16; len as usize];
        let written = unsafe { MultiByteToWideChar(codepage, flags, bytes, Some(&mut wide)) };
        if written <= 0 {
            return None;
        }
        wide.truncate(written as usize);
        Some(String::from_utf16_lossy(&wide))
    }
}
