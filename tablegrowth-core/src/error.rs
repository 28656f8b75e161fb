//! Error types for the audit pipeline.
//!
//! Every variant maps onto a branch of the pipeline (region, instance,
//! schema, shipment) so the orchestrator can record the failure against
//! that branch and keep going. Messages never carry passwords, secret
//! bodies or connection strings.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Boxed error used as the `#[source]` of wrapped failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for tablegrowth operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Missing or invalid setting; fatal before any work starts
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Listing instances in a region failed
    #[error("Instance discovery failed in region {region}")]
    Discovery {
        region: String,
        #[source]
        source: BoxError,
    },

    /// Fetching the tag set of one instance failed
    #[error("Tag retrieval failed for instance {instance}")]
    TagRetrieval {
        instance: String,
        #[source]
        source: BoxError,
    },

    /// Credentials could not be resolved for an instance
    #[error("Credential resolution failed for instance {instance}: {reason}")]
    Credential {
        instance: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The secret store rejected or could not answer a lookup
    #[error("Secret store lookup failed: {context}")]
    SecretStore {
        context: String,
        #[source]
        source: BoxError,
    },

    /// The schema list tag is missing or empty
    #[error("No schemas to audit for instance {instance}")]
    SchemaList { instance: String },

    /// Database connection failed (credentials sanitized)
    #[error("Database connection failed: {context}")]
    Connection {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Catalog query failed mid-way or before the first row
    #[error("Query execution failed: {context}")]
    Query {
        context: String,
        #[source]
        source: BoxError,
    },

    /// A metrics backend rejected or never received a payload
    #[error("Metric shipping failed: {context}")]
    Shipping {
        context: String,
        #[source]
        source: BoxError,
    },

    /// An external call exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// A spawned branch panicked or was cancelled
    #[error("Task failed: {context}")]
    TaskFailed { context: String },
}

/// Convenience type alias for Results with AuditError
pub type Result<T> = std::result::Result<T, AuditError>;

/// Serializable classification of an [`AuditError`], used in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Discovery,
    TagRetrieval,
    Credential,
    SchemaList,
    Connection,
    Query,
    Shipping,
    Timeout,
    TaskFailed,
}

impl AuditError {
    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a discovery error for a region
    pub fn discovery<E>(region: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Discovery {
            region: region.into(),
            source: Box::new(error),
        }
    }

    /// Creates a tag retrieval error for an instance
    pub fn tag_retrieval<E>(instance: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TagRetrieval {
            instance: instance.into(),
            source: Box::new(error),
        }
    }

    /// Creates a credential error. `reason` must not contain secret material.
    pub fn credential(instance: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Credential {
            instance: instance.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Creates a credential error caused by `error`, keeping its chain.
    pub fn credential_caused_by<E>(
        instance: impl Into<String>,
        reason: impl Into<String>,
        error: E,
    ) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Credential {
            instance: instance.into(),
            reason: reason.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates a secret store error
    pub fn secret_store<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::SecretStore {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a connection error with sanitized context
    pub fn connection_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a query execution error
    pub fn query_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Query {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a shipping error
    pub fn shipping<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Shipping {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Classifies the error for reporting.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Configuration { .. } => FailureKind::Configuration,
            Self::Discovery { .. } => FailureKind::Discovery,
            Self::TagRetrieval { .. } => FailureKind::TagRetrieval,
            Self::Credential { .. } | Self::SecretStore { .. } => FailureKind::Credential,
            Self::SchemaList { .. } => FailureKind::SchemaList,
            Self::Connection { .. } => FailureKind::Connection,
            Self::Query { .. } => FailureKind::Query,
            Self::Shipping { .. } => FailureKind::Shipping,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::TaskFailed { .. } => FailureKind::TaskFailed,
        }
    }

    /// Renders the error with its source chain on one line.
    ///
    /// Sources are driver or SDK errors, which carry host and status
    /// information but never the credentials used to connect.
    pub fn display_chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut current = std::error::Error::source(self);
        while let Some(source) = current {
            rendered.push_str(": ");
            rendered.push_str(&source.to_string());
            current = source.source();
        }
        rendered
    }
}

/// Runs `future` under `after`, mapping an elapsed deadline to
/// [`AuditError::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, after: Duration, future: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, future).await {
        Ok(result) => result,
        Err(_) => Err(AuditError::timeout(operation, after)),
    }
}
