//! # ExternalSecret Custom Resource
//!
//! The declarative definition this tool reconciles: a mapping from source
//! secret fields to a destination scope/property in one of the supported
//! secret store backends.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: secret-populator.dev/v1
//! kind: ExternalSecret
//! metadata:
//!   name: pipeline-user
//!   namespace: platform
//! spec:
//!   backendType: vault
//!   data:
//!     - name: token
//!       key: secret/data/platform/pipelineUser
//!       property: token
//!       sourceKey: platform-boot
//!       sourceProperty: password
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::Error;

/// Secret store backend a definition targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum BackendType {
    /// HashiCorp Vault KV v2 (hierarchical path + field map)
    #[serde(rename = "vault")]
    Vault,
    /// Google Cloud Secret Manager (flat name)
    #[serde(rename = "gcpSecretsManager")]
    GoogleSecretManager,
    /// Azure Key Vault (flat name)
    #[serde(rename = "azureKeyVault")]
    AzureKeyVault,
    /// Cluster-native Secret objects (namespace + name + byte-map fields)
    #[serde(rename = "kubernetes")]
    Kubernetes,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vault => "vault",
            Self::GoogleSecretManager => "gcpSecretsManager",
            Self::AzureKeyVault => "azureKeyVault",
            Self::Kubernetes => "kubernetes",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for BackendType {
    fn default() -> Self {
        Self::Kubernetes
    }
}

/// ExternalSecret Custom Resource Definition
///
/// Each resource declares one destination secret and how every one of its
/// properties is obtained: copied verbatim from an existing source secret,
/// supplied by a schema default or generator, or composed from a template
/// (see the schema annotation step in [`crate::schemas`]).
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ExternalSecret",
    group = "secret-populator.dev",
    version = "v1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSecretSpec {
    /// Which secret store backend this definition writes to
    #[serde(default)]
    pub backend_type: BackendType,
    /// GCP project hosting the Secret Manager (gcpSecretsManager only)
    #[serde(default)]
    pub project_id: Option<String>,
    /// Key Vault name or full vault URL (azureKeyVault only)
    #[serde(default)]
    pub key_vault_name: Option<String>,
    /// Vault KV v2 mount point override (vault only, default "secret")
    #[serde(default)]
    pub vault_mount_point: Option<String>,
    /// Vault auth role (vault only, informational for connection setup)
    #[serde(default)]
    pub vault_role: Option<String>,
    /// Field mappings for the destination secret
    #[serde(default)]
    pub data: Vec<DataMapping>,
}

/// One field of the destination secret.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataMapping {
    /// Field name, matched against the schema object's property names
    pub name: String,
    /// Destination scope/path within the backend (e.g. a Vault path).
    /// Namespaced backends fold this into the secret name instead.
    #[serde(default)]
    pub key: Option<String>,
    /// Destination property within the scope
    pub property: String,
    /// Name of an existing secret holding the raw value (literal copy)
    #[serde(default)]
    pub source_key: Option<String>,
    /// Property of the source secret to copy (defaults to `property`)
    #[serde(default)]
    pub source_property: Option<String>,
}

impl ExternalSecret {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("")
    }

    /// Backend location for this definition: GCP project, vault name, or the
    /// namespace for cluster-native secrets. Vault uses a single configured
    /// server, so its location is empty.
    pub fn location(&self) -> String {
        match self.spec.backend_type {
            BackendType::Vault => String::new(),
            BackendType::GoogleSecretManager => {
                self.spec.project_id.clone().unwrap_or_default()
            }
            BackendType::AzureKeyVault => {
                self.spec.key_vault_name.clone().unwrap_or_default()
            }
            BackendType::Kubernetes => self.namespace().to_string(),
        }
    }

    /// Destination scope for one mapping. Backends with an explicit path use
    /// the mapping `key`; the cluster-native backend always writes a secret
    /// named after the definition.
    pub fn destination_scope(&self, mapping: &DataMapping) -> String {
        match self.spec.backend_type {
            BackendType::Kubernetes => self.name().to_string(),
            _ => mapping.key.clone().unwrap_or_else(|| self.name().to_string()),
        }
    }

    /// Structural validation. Destination properties must be unique and
    /// backend-specific location data must be present.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name().is_empty() {
            return Err(Error::malformed("<unnamed>", "missing metadata.name"));
        }
        let mut seen = HashSet::new();
        for mapping in &self.spec.data {
            if !seen.insert(mapping.property.as_str()) {
                return Err(Error::malformed(
                    self.name(),
                    format!("duplicate destination property {:?}", mapping.property),
                ));
            }
        }
        match self.spec.backend_type {
            BackendType::GoogleSecretManager if self.spec.project_id.is_none() => Err(
                Error::malformed(self.name(), "gcpSecretsManager requires spec.projectId"),
            ),
            BackendType::AzureKeyVault if self.spec.key_vault_name.is_none() => Err(
                Error::malformed(self.name(), "azureKeyVault requires spec.keyVaultName"),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    fn definition(name: &str, data: Vec<DataMapping>) -> ExternalSecret {
        ExternalSecret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("platform".to_string()),
                ..Default::default()
            },
            spec: ExternalSecretSpec {
                backend_type: BackendType::Vault,
                project_id: None,
                key_vault_name: None,
                vault_mount_point: None,
                vault_role: None,
                data,
            },
        }
    }

    fn mapping(name: &str, key: &str, property: &str) -> DataMapping {
        DataMapping {
            name: name.to_string(),
            key: Some(key.to_string()),
            property: property.to_string(),
            source_key: None,
            source_property: None,
        }
    }

    #[test]
    fn test_backend_type_serde_names() {
        assert_eq!(
            serde_json::to_string(&BackendType::GoogleSecretManager).unwrap(),
            "\"gcpSecretsManager\""
        );
        let parsed: BackendType = serde_json::from_str("\"azureKeyVault\"").unwrap();
        assert_eq!(parsed, BackendType::AzureKeyVault);
    }

    #[test]
    fn test_validate_accepts_unique_properties() {
        let es = definition(
            "admin-user",
            vec![
                mapping("username", "secret/data/platform/adminUser", "username"),
                mapping("password", "secret/data/platform/adminUser", "password"),
            ],
        );
        assert!(es.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_destination_property() {
        let es = definition(
            "admin-user",
            vec![
                mapping("username", "secret/data/platform/adminUser", "username"),
                mapping("alias", "secret/data/platform/adminUser", "username"),
            ],
        );
        let err = es.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate destination property"));
    }

    #[test]
    fn test_validate_requires_gcp_project() {
        let mut es = definition("admin-user", vec![]);
        es.spec.backend_type = BackendType::GoogleSecretManager;
        assert!(es.validate().is_err());
        es.spec.project_id = Some("123456".to_string());
        assert!(es.validate().is_ok());
    }

    #[test]
    fn test_kubernetes_backend_folds_scope_into_name() {
        let mut es = definition(
            "webhook-hmac",
            vec![mapping("hmac", "secret/data/platform/webhookHmac", "hmac")],
        );
        es.spec.backend_type = BackendType::Kubernetes;
        assert_eq!(es.destination_scope(&es.spec.data[0]), "webhook-hmac");
        assert_eq!(es.location(), "platform");
    }

    #[test]
    fn test_vault_backend_uses_mapping_key() {
        let es = definition(
            "webhook-hmac",
            vec![mapping("hmac", "secret/data/platform/webhookHmac", "hmac")],
        );
        assert_eq!(
            es.destination_scope(&es.spec.data[0]),
            "secret/data/platform/webhookHmac"
        );
        assert_eq!(es.location(), "");
    }
}
