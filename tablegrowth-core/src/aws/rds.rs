//! RDS instance directory.

use crate::discovery::{InstanceDescriptor, InstanceDirectory, InstancePage};
use crate::error::AuditError;
use crate::models::Tag;
use crate::Result;
use async_trait::async_trait;
use aws_config::{Region, SdkConfig};

/// Lists RDS instances and their tags.
#[derive(Debug, Clone)]
pub struct RdsDirectory {
    sdk_config: SdkConfig,
}

impl RdsDirectory {
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self { sdk_config }
    }

    fn client(&self, region: &str) -> aws_sdk_rds::Client {
        let config = aws_sdk_rds::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()))
            .build();
        aws_sdk_rds::Client::from_conf(config)
    }
}

#[async_trait]
impl InstanceDirectory for RdsDirectory {
    async fn list_instances(&self, region: &str, max_records: i32) -> Result<InstancePage> {
        let output = self
            .client(region)
            .describe_db_instances()
            .max_records(max_records)
            .send()
            .await
            .map_err(|e| AuditError::discovery(region, e))?;

        let instances = output
            .db_instances()
            .iter()
            .filter_map(|db| {
                // Instances without an ARN cannot be tagged or audited.
                let identifier = db.db_instance_arn()?.to_string();
                let name = db
                    .db_instance_identifier()
                    .unwrap_or(identifier.as_str())
                    .to_string();
                let endpoint = db.endpoint();
                Some(InstanceDescriptor {
                    identifier,
                    name,
                    address: endpoint.and_then(|e| e.address()).map(str::to_string),
                    port: endpoint
                        .and_then(|e| e.port())
                        .and_then(|p| u16::try_from(p).ok()),
                })
            })
            .collect();

        Ok(InstancePage {
            instances,
            next_marker: output.marker().map(str::to_string),
        })
    }

    async fn list_tags(&self, region: &str, identifier: &str) -> Result<Vec<Tag>> {
        let output = self
            .client(region)
            .list_tags_for_resource()
            .resource_name(identifier)
            .send()
            .await
            .map_err(|e| AuditError::tag_retrieval(identifier, e))?;

        Ok(output
            .tag_list()
            .iter()
            .filter_map(|tag| Some(Tag::new(tag.key()?, tag.value().unwrap_or_default())))
            .collect())
    }
}
