//! Log file setup for service mode.
//!
//! The file is opened once in append mode. Size is only checked at startup: an
//! oversized file is deleted and a fresh one begins.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::info;

pub const LOG_FILE_NAME: &str = "proxyswitch.log";
pub const MAX_LOG_SIZE: u64 = 15 * 1024 * 1024;

pub fn default_log_path() -> PathBuf {
    std::env::temp_dir().join(LOG_FILE_NAME)
}

#[derive(Debug)]
pub struct OpenedLog {
    pub file: File,
    pub path: PathBuf,
    /// The previous file was over the limit and has been removed.
    pub rotated: bool,
}

pub fn open_log_file(path: &Path, max_size: u64) -> io::Result<OpenedLog> {
    let mut rotated = false;
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.len() > max_size {
            std::fs::remove_file(path)?;
            rotated = true;
        }
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(OpenedLog {
        file,
        path: path.to_path_buf(),
        rotated,
    })
}

fn env_filter(default: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default))
}

/// Send all tracing output to the log file. Failing here is fatal for the
/// service, which must not run unaudited.
pub fn init_file_logging(path: Option<&Path>) -> Result<PathBuf> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_log_path);
    let opened = open_log_file(&path, MAX_LOG_SIZE)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(opened.file))
        .init();

    if opened.rotated {
        info!(limit_bytes = MAX_LOG_SIZE, "log file exceeded 15MB, created new one");
    }
    Ok(opened.path)
}

/// Interactive modes log to stderr so stdout stays a clean report.
pub fn init_console_logging(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .with_writer(io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn small_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        std::fs::write(&path, "first\n").unwrap();

        let mut opened = open_log_file(&path, 1024).unwrap();
        assert!(!opened.rotated);
        writeln!(opened.file, "second").unwrap();
        drop(opened);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn oversized_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        std::fs::write(&path, vec![b'x'; 64]).unwrap();

        let mut opened = open_log_file(&path, 32).unwrap();
        assert!(opened.rotated);
        writeln!(opened.file, "fresh").unwrap();
        drop(opened);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
    }

    #[test]
    fn missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested.log");
        let opened = open_log_file(&path, MAX_LOG_SIZE).unwrap();
        assert!(!opened.rotated);
        assert!(path.exists());
    }

    #[test]
    fn unopenable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("x.log");
        assert!(open_log_file(&path, MAX_LOG_SIZE).is_err());
    }
}
