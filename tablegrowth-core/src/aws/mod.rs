//! AWS-backed instance directory and secret store (feature `aws`).
//!
//! # Module Structure
//! - `rds`: instance listing and tag retrieval
//! - `ssm`: decrypted parameter lookup
//!
//! Both adapters share one loaded SDK configuration and derive a
//! region-scoped client per call.

pub mod rds;
pub mod ssm;

pub use rds::RdsDirectory;
pub use ssm::SsmSecretStore;

use aws_config::{BehaviorVersion, SdkConfig};

/// Loads the shared SDK configuration from the default provider chain
/// (environment, profile, instance metadata).
pub async fn load_sdk_config() -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest()).load().await
}
