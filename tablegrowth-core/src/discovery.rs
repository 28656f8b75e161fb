//! Fleet discovery across regions.
//!
//! Each region is listed in its own spawned task; within a region the tag
//! sets are fetched concurrently with bounded width. Results flow back as
//! task return values and are merged by the single joining caller, so there
//! is no shared accumulator to lock.
//!
//! # Failure handling
//! - A region whose listing fails is recorded and skipped; other regions
//!   still contribute their instances
//! - An instance whose tag fetch fails is kept with an empty tag set and
//!   the failure is recorded
//! - Only the first directory page is read; a region with more pages is
//!   recorded as truncated

use crate::config::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::error::{AuditError, with_timeout};
use crate::models::{Instance, Tag, TagSet};
use crate::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Instance record as listed by the directory, before tags are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescriptor {
    pub identifier: String,
    pub name: String,
    pub address: Option<String>,
    pub port: Option<u16>,
}

/// One page of a region listing.
#[derive(Debug, Clone, Default)]
pub struct InstancePage {
    pub instances: Vec<InstanceDescriptor>,
    /// Set when the directory has more pages
    pub next_marker: Option<String>,
}

/// Per-region directory of database instances.
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    /// Lists up to `max_records` instances in `region`.
    async fn list_instances(&self, region: &str, max_records: i32) -> Result<InstancePage>;

    /// Lists the tags of the instance identified by `identifier`.
    async fn list_tags(&self, region: &str, identifier: &str) -> Result<Vec<Tag>>;
}

/// A region that could not be listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFailure {
    pub region: String,
    pub error_message: String,
}

/// An instance whose tags could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFailure {
    pub region: String,
    pub instance: String,
    pub error_message: String,
}

/// Result of one discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Unordered across regions
    pub instances: Vec<Instance>,
    pub regions_queried: usize,
    pub failed_regions: Vec<RegionFailure>,
    pub tag_failures: Vec<TagFailure>,
    /// Regions with more instances than the first page returned
    pub truncated_regions: Vec<String>,
}

struct RegionOutcome {
    instances: Vec<Instance>,
    tag_failures: Vec<TagFailure>,
    truncated: bool,
}

/// Enumerates instances across a fixed set of regions.
#[derive(Clone)]
pub struct RegionInstanceDiscoverer {
    directory: Arc<dyn InstanceDirectory>,
    regions: Vec<String>,
    page_size: i32,
    tag_concurrency: usize,
    timeout: Duration,
}

impl RegionInstanceDiscoverer {
    /// Creates a discoverer over `regions`.
    pub fn new(directory: Arc<dyn InstanceDirectory>, regions: Vec<String>) -> Self {
        Self {
            directory,
            regions,
            page_size: MAX_PAGE_SIZE,
            tag_concurrency: 16,
            timeout: Duration::from_secs(30),
        }
    }

    /// Builder method to set the directory page size, clamped to what the
    /// directory accepts.
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
        self
    }

    /// Builder method to bound concurrent tag fetches per region.
    pub fn with_tag_concurrency(mut self, tag_concurrency: usize) -> Self {
        self.tag_concurrency = tag_concurrency.max(1);
        self
    }

    /// Builder method to set the deadline of every directory call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Discovers instances in every region.
    ///
    /// Never fails as a whole: region and tag failures are reported in the
    /// returned [`Discovery`].
    pub async fn discover(&self) -> Discovery {
        tracing::info!(regions = self.regions.len(), "Listing database instances");

        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();
        for region in &self.regions {
            let discoverer = self.clone();
            let name = region.clone();
            let handle = tasks.spawn(async move {
                let outcome = discoverer.discover_region(&name).await;
                (name, outcome)
            });
            names.insert(handle.id(), region.clone());
        }

        let mut discovery = Discovery {
            regions_queried: self.regions.len(),
            ..Default::default()
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((region, Ok(outcome))) => {
                    tracing::debug!(
                        region = %region,
                        instances = outcome.instances.len(),
                        "Region listed"
                    );
                    if outcome.truncated {
                        discovery.truncated_regions.push(region);
                    }
                    discovery.instances.extend(outcome.instances);
                    discovery.tag_failures.extend(outcome.tag_failures);
                }
                Ok((region, Err(e))) => {
                    tracing::warn!(region = %region, "Skipping region: {}", e.display_chain());
                    discovery.failed_regions.push(RegionFailure {
                        region,
                        error_message: e.display_chain(),
                    });
                }
                Err(join_error) => {
                    let region = names
                        .remove(&join_error.id())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    tracing::error!(region = %region, "Region discovery task failed: {}", join_error);
                    discovery.failed_regions.push(RegionFailure {
                        region,
                        error_message: join_error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            instances = discovery.instances.len(),
            failed_regions = discovery.failed_regions.len(),
            tag_failures = discovery.tag_failures.len(),
            "Discovery completed"
        );
        discovery
    }

    async fn discover_region(&self, region: &str) -> Result<RegionOutcome> {
        tracing::info!(region = %region, "Fetching instances");

        let page = with_timeout(
            "instance listing",
            self.timeout,
            self.directory.list_instances(region, self.page_size),
        )
        .await
        .map_err(|e| match e {
            AuditError::Discovery { .. } => e,
            other => AuditError::discovery(region, other),
        })?;

        let truncated = page.next_marker.is_some();
        if let Some(marker) = &page.next_marker {
            tracing::warn!(
                region = %region,
                page_size = self.page_size,
                "More instances exist than one page holds; only the first page is audited"
            );
            tracing::debug!(region = %region, marker = %marker, "Listing has a next marker");
        }

        let results: Vec<(Instance, Option<TagFailure>)> = stream::iter(page.instances)
            .map(|descriptor| self.attach_tags(region, descriptor))
            .buffer_unordered(self.tag_concurrency)
            .collect()
            .await;

        let mut instances = Vec::with_capacity(results.len());
        let mut tag_failures = Vec::new();
        for (instance, failure) in results {
            instances.push(instance);
            tag_failures.extend(failure);
        }

        Ok(RegionOutcome {
            instances,
            tag_failures,
            truncated,
        })
    }

    async fn attach_tags(
        &self,
        region: &str,
        descriptor: InstanceDescriptor,
    ) -> (Instance, Option<TagFailure>) {
        let fetched = with_timeout(
            "tag listing",
            self.timeout,
            self.directory.list_tags(region, &descriptor.identifier),
        )
        .await;

        let (tags, failure) = match fetched {
            Ok(tags) => (TagSet::new(tags), None),
            Err(e) => {
                let error = match e {
                    AuditError::TagRetrieval { .. } => e,
                    other => AuditError::tag_retrieval(&descriptor.name, other),
                };
                tracing::warn!(
                    region = %region,
                    instance = %descriptor.name,
                    "Continuing without tags: {}",
                    error.display_chain()
                );
                let failure = TagFailure {
                    region: region.to_string(),
                    instance: descriptor.name.clone(),
                    error_message: error.display_chain(),
                };
                (TagSet::default(), Some(failure))
            }
        };

        let instance = Instance {
            identifier: descriptor.identifier,
            name: descriptor.name,
            region: region.to_string(),
            address: descriptor.address,
            port: descriptor.port,
            tags,
        };
        (instance, failure)
    }
}
