//! Per-instance credential resolution.
//!
//! An instance names its credentials through a tag of the form
//! `<secretRegion>:<secretPath>`. The resolver reads that tag, fetches the
//! secret (decrypted) from the store and parses its JSON body.
//!
//! # Security
//! - Secret bodies are parsed into zeroizing buffers and never logged
//! - Error reasons name the instance and the failing step, never the secret
//! - A credential with an empty user or password is never returned

use crate::error::{AuditError, with_timeout};
use crate::models::{Credential, Instance};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use zeroize::{Zeroize, Zeroizing};

/// Read access to an encrypted parameter store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetches the value stored at `path` in `region`.
    ///
    /// # Errors
    /// Returns an error if the parameter is missing or the call fails
    async fn get_secret(&self, path: &str, region: &str, decrypt: bool) -> Result<String>;
}

/// Location of a secret: region plus parameter path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPath {
    pub region: String,
    pub path: String,
}

impl CredentialPath {
    /// Parses `<region>:<path>`, splitting on the first colon only so the
    /// path may itself contain colons.
    ///
    /// Returns `None` for values without a colon or with an empty side.
    pub fn parse(value: &str) -> Option<Self> {
        let (region, path) = value.split_once(':')?;
        let (region, path) = (region.trim(), path.trim());
        if region.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self {
            region: region.to_string(),
            path: path.to_string(),
        })
    }
}

impl std::fmt::Display for CredentialPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.region, self.path)
    }
}

/// Expected JSON body of a credential secret.
#[derive(Deserialize, Zeroize)]
#[zeroize(drop)]
struct SecretPayload {
    #[serde(default, alias = "user")]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Resolves database credentials for instances.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn SecretStore>,
    tag_key: String,
    default_path: Option<CredentialPath>,
    default_user: Option<String>,
    timeout: Duration,
}

impl CredentialResolver {
    /// Creates a resolver reading the credential location from `tag_key`.
    pub fn new(store: Arc<dyn SecretStore>, tag_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            tag_key: tag_key.into(),
            default_path: None,
            default_user: None,
            timeout,
        }
    }

    /// Builder method to set the path used when the tag is absent.
    pub fn with_default_path(mut self, path: Option<CredentialPath>) -> Self {
        self.default_path = path;
        self
    }

    /// Builder method to set the user assumed when the secret has none.
    pub fn with_default_user(mut self, user: Option<String>) -> Self {
        self.default_user = user;
        self
    }

    /// Determines where the instance's secret lives.
    ///
    /// # Errors
    /// Returns [`AuditError::Credential`] when the tag is malformed, or
    /// absent with no default path configured
    pub fn credential_path(&self, instance: &Instance) -> Result<CredentialPath> {
        match instance.tag_value(&self.tag_key) {
            Some(value) => CredentialPath::parse(value).ok_or_else(|| {
                AuditError::credential(
                    &instance.name,
                    format!(
                        "tag '{}' must look like <region>:<path>",
                        self.tag_key
                    ),
                )
            }),
            None => self.default_path.clone().ok_or_else(|| {
                AuditError::credential(
                    &instance.name,
                    format!("tag '{}' is missing", self.tag_key),
                )
            }),
        }
    }

    /// Resolves a non-empty credential for `instance`.
    ///
    /// # Errors
    /// Returns [`AuditError::Credential`] if the location is malformed, the
    /// store call fails or times out, or the body lacks a field
    pub async fn resolve(&self, instance: &Instance) -> Result<Credential> {
        let location = self.credential_path(instance)?;

        tracing::debug!(
            instance = %instance.name,
            secret_region = %location.region,
            "Fetching database credentials"
        );

        let body = with_timeout(
            "secret store lookup",
            self.timeout,
            self.store.get_secret(&location.path, &location.region, true),
        )
        .await
        .map(Zeroizing::new)
        .map_err(|e| {
            AuditError::credential_caused_by(
                &instance.name,
                format!("secret lookup at {} failed", location),
                e,
            )
        })?;

        self.parse_credential(&instance.name, &body)
    }

    fn parse_credential(&self, instance: &str, body: &str) -> Result<Credential> {
        let mut payload: SecretPayload = serde_json::from_str(body).map_err(|e| {
            // The serde message can quote fragments of the body; keep only
            // the position.
            AuditError::credential(
                instance,
                format!(
                    "secret is not a valid credential document (line {}, column {})",
                    e.line(),
                    e.column()
                ),
            )
        })?;

        let user = payload
            .username
            .take()
            .filter(|u| !u.is_empty())
            .or_else(|| self.default_user.clone())
            .ok_or_else(|| AuditError::credential(instance, "secret has no username"))?;
        let password = payload
            .password
            .take()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AuditError::credential(instance, "secret has no password"))?;

        Credential::new(user, password)
            .ok_or_else(|| AuditError::credential(instance, "secret has an empty field"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagSet;
    use std::collections::HashMap;

    struct StaticStore {
        secrets: HashMap<(String, String), String>,
    }

    #[async_trait]
    impl SecretStore for StaticStore {
        async fn get_secret(&self, path: &str, region: &str, decrypt: bool) -> Result<String> {
            assert!(decrypt, "credential secrets must be decrypted");
            self.secrets
                .get(&(region.to_string(), path.to_string()))
                .cloned()
                .ok_or_else(|| {
                    AuditError::secret_store(
                        "parameter not found",
                        std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()),
                    )
                })
        }
    }

    fn store_with(region: &str, path: &str, body: &str) -> Arc<dyn SecretStore> {
        let mut secrets = HashMap::new();
        secrets.insert((region.to_string(), path.to_string()), body.to_string());
        Arc::new(StaticStore { secrets })
    }

    fn instance(tags: &[(&str, &str)]) -> Instance {
        Instance {
            identifier: "arn:aws:rds:us-east-1:123456789012:db:orders".to_string(),
            name: "orders".to_string(),
            region: "us-east-1".to_string(),
            address: Some("orders.example".to_string()),
            port: None,
            tags: tags.iter().copied().collect::<TagSet>(),
        }
    }

    fn resolver(store: Arc<dyn SecretStore>) -> CredentialResolver {
        CredentialResolver::new(store, "cred_path", Duration::from_secs(5))
    }

    #[test]
    fn test_credential_path_parse() {
        let path = CredentialPath::parse("us-east-1:/app/creds").unwrap();
        assert_eq!(path.region, "us-east-1");
        assert_eq!(path.path, "/app/creds");
        assert_eq!(path.to_string(), "us-east-1:/app/creds");
    }

    #[test]
    fn test_credential_path_splits_on_first_colon() {
        let path = CredentialPath::parse("eu-west-1:/app/db:primary").unwrap();
        assert_eq!(path.region, "eu-west-1");
        assert_eq!(path.path, "/app/db:primary");
    }

    #[test]
    fn test_credential_path_rejects_malformed() {
        assert!(CredentialPath::parse("us-east-1/app/creds").is_none());
        assert!(CredentialPath::parse(":/app/creds").is_none());
        assert!(CredentialPath::parse("us-east-1:").is_none());
    }

    #[tokio::test]
    async fn test_credential_resolve_success() {
        let store = store_with(
            "us-east-1",
            "/app/creds",
            r#"{"username":"auditor","password":"s3cret"}"#,
        );
        let credential = resolver(store)
            .resolve(&instance(&[("cred_path", "us-east-1:/app/creds")]))
            .await
            .unwrap();

        assert_eq!(credential.user(), "auditor");
        assert_eq!(credential.password(), "s3cret");
    }

    #[tokio::test]
    async fn test_credential_malformed_tag_fails() {
        let store = store_with("us-east-1", "/app/creds", "{}");
        let error = resolver(store)
            .resolve(&instance(&[("cred_path", "no-colon-here")]))
            .await
            .unwrap_err();

        assert!(matches!(error, AuditError::Credential { .. }));
    }

    #[tokio::test]
    async fn test_credential_missing_tag_uses_default_path() {
        let store = store_with(
            "eu-west-1",
            "/shared/creds",
            r#"{"user":"auditor","password":"s3cret"}"#,
        );
        let without_default = resolver(store);

        let error = without_default.resolve(&instance(&[])).await.unwrap_err();
        assert!(error.to_string().contains("missing"));

        let with_default = without_default
            .with_default_path(CredentialPath::parse("eu-west-1:/shared/creds"));
        let credential = with_default.resolve(&instance(&[])).await.unwrap();
        assert_eq!(credential.user(), "auditor");
    }

    #[tokio::test]
    async fn test_credential_store_failure_is_credential_error() {
        let store = store_with("us-east-1", "/other", "{}");
        let error = resolver(store)
            .resolve(&instance(&[("cred_path", "us-east-1:/app/creds")]))
            .await
            .unwrap_err();

        assert!(matches!(error, AuditError::Credential { .. }));
        assert!(error.to_string().contains("us-east-1:/app/creds"));
    }

    struct DenyingStore;

    #[async_trait]
    impl SecretStore for DenyingStore {
        async fn get_secret(&self, path: &str, region: &str, _decrypt: bool) -> Result<String> {
            Err(AuditError::secret_store(
                format!("GetParameter {} in {}", path, region),
                std::io::Error::other("AccessDeniedException: no ssm:GetParameter permission"),
            ))
        }
    }

    #[tokio::test]
    async fn test_credential_store_failure_keeps_cause() {
        let error = resolver(Arc::new(DenyingStore))
            .resolve(&instance(&[("cred_path", "us-east-1:/app/creds")]))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), crate::error::FailureKind::Credential);
        let chain = error.display_chain();
        assert!(chain.contains("Secret store lookup failed"), "{}", chain);
        assert!(chain.contains("AccessDeniedException"), "{}", chain);
        assert!(!chain.contains("Database connection failed"), "{}", chain);
    }

    #[tokio::test]
    async fn test_credential_missing_fields_fail() {
        let cases = [
            r#"{"username":"auditor"}"#,
            r#"{"password":"s3cret"}"#,
            r#"{"username":"","password":"s3cret"}"#,
            r#"{"username":"auditor","password":""}"#,
            "not json at all",
        ];

        for body in cases {
            let store = store_with("us-east-1", "/app/creds", body);
            let result = resolver(store)
                .resolve(&instance(&[("cred_path", "us-east-1:/app/creds")]))
                .await;
            assert!(result.is_err(), "body {:?} should be rejected", body);
        }
    }

    #[tokio::test]
    async fn test_credential_default_user_fills_missing_username() {
        let store = store_with("us-east-1", "/app/creds", r#"{"password":"s3cret"}"#);
        let credential = resolver(store)
            .with_default_user(Some("auditor".to_string()))
            .resolve(&instance(&[("cred_path", "us-east-1:/app/creds")]))
            .await
            .unwrap();

        assert_eq!(credential.user(), "auditor");
    }

    #[tokio::test]
    async fn test_credential_error_never_contains_secret() {
        let store = store_with("us-east-1", "/app/creds", r#"{"password": hunter2}"#);
        let error = resolver(store)
            .resolve(&instance(&[("cred_path", "us-east-1:/app/creds")]))
            .await
            .unwrap_err();

        assert!(!error.display_chain().contains("hunter2"));
    }
}
