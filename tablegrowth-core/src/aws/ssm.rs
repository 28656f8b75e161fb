//! SSM parameter store as the credential secret store.

use crate::credentials::SecretStore;
use crate::error::AuditError;
use crate::Result;
use async_trait::async_trait;
use aws_config::{Region, SdkConfig};

/// Reads (optionally decrypted) parameters from SSM in any region.
#[derive(Debug, Clone)]
pub struct SsmSecretStore {
    sdk_config: SdkConfig,
}

impl SsmSecretStore {
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self { sdk_config }
    }

    fn client(&self, region: &str) -> aws_sdk_ssm::Client {
        let config = aws_sdk_ssm::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()))
            .build();
        aws_sdk_ssm::Client::from_conf(config)
    }
}

#[async_trait]
impl SecretStore for SsmSecretStore {
    async fn get_secret(&self, path: &str, region: &str, decrypt: bool) -> Result<String> {
        let context = format!("GetParameter {} in {}", path, region);
        let output = self
            .client(region)
            .get_parameter()
            .name(path)
            .with_decryption(decrypt)
            .send()
            .await
            .map_err(|e| AuditError::secret_store(&context, e))?;

        output
            .parameter()
            .and_then(|p| p.value())
            .map(str::to_string)
            .ok_or_else(|| {
                AuditError::secret_store(
                    context,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "parameter has no value"),
                )
            })
    }
}
