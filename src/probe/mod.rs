//! Live system probes feeding the policy decision.

pub mod gateway;
pub mod identity;

pub use gateway::{GatewayLocator, GatewayProbe, GatewayStrategy, ProbeConfidence};
pub use identity::{IdentityChecker, IdentitySource, SystemIdentity, UserCheck};
