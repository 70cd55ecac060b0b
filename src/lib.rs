//! Condition-driven system proxy switch for Windows endpoints.
//!
//! Every cycle, the active default gateway and/or the logged-in user are
//! checked against a [`config::PolicyConfig`] and the per-user proxy setting
//! is enabled or disabled to match.

pub mod app;
pub mod common;
pub mod config;
pub mod probe;
