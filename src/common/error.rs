use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = SwitchError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum SwitchError {
    /// The external tool could not be started or exited abnormally.
    #[error("failed to run `{tool}`: {reason}")]
    ToolInvocation { tool: String, reason: String },

    #[error("`{tool}` did not finish within {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    /// The tool ran but its output had none of the expected shapes.
    #[error("unexpected `{tool}` output: {detail}")]
    Parse { tool: String, detail: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("proxy settings store: {0}")]
    StoreAccess(String),

    #[error("config error: {0}")]
    Configuration(String),
}

impl SwitchError {
    pub fn tool_invocation(tool: &str, reason: impl ToString) -> Self {
        SwitchError::ToolInvocation {
            tool: tool.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(tool: &str, detail: impl ToString) -> Self {
        SwitchError::Parse {
            tool: tool.to_string(),
            detail: detail.to_string(),
        }
    }

    /// Get the kind/category of this error.
    pub fn kind(&self) -> SwitchErrorKind {
        match self {
            SwitchError::ToolInvocation { .. } => SwitchErrorKind::ToolInvocation,
            SwitchError::ToolTimeout { .. } => SwitchErrorKind::ToolTimeout,
            SwitchError::Parse { .. } => SwitchErrorKind::Parse,
            SwitchError::NotFound(_) => SwitchErrorKind::NotFound,
            SwitchError::StoreAccess(_) => SwitchErrorKind::StoreAccess,
            SwitchError::Configuration(_) => SwitchErrorKind::Configuration,
        }
    }
}

/// Lightweight error category for pattern matching without borrowing the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchErrorKind {
    ToolInvocation,
    ToolTimeout,
    Parse,
    NotFound,
    StoreAccess,
    Configuration,
}

impl SwitchErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchErrorKind::ToolInvocation => "TOOL_FAILED",
            SwitchErrorKind::ToolTimeout => "TOOL_TIMEOUT",
            SwitchErrorKind::Parse => "PARSE",
            SwitchErrorKind::NotFound => "NOT_FOUND",
            SwitchErrorKind::StoreAccess => "STORE_ACCESS",
            SwitchErrorKind::Configuration => "CONFIG",
        }
    }
}
