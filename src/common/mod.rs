pub mod command;
pub mod error;

#[cfg(test)]
pub(crate) mod testutil;

pub use command::{CommandRunner, SystemCommandRunner, ToolOutput};
pub use error::{Result, SwitchError, SwitchErrorKind};
