//! # Vault Secret Store
//!
//! HashiCorp Vault KV v2 backend. Hierarchical: the scope is a path within a
//! KV v2 mount and a secret is a field map, so no folding is needed.
//!
//! Scopes written in the mount-qualified style (`secret/data/platform/adminUser`)
//! are split into mount `secret` and path `platform/adminUser`; bare paths use
//! the configured default mount.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;

use super::SecretStore;
use crate::error::StoreError;

const BACKEND: &str = "vault";

/// Connection settings, normally read from the standard `VAULT_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub address: String,
    pub token: Option<String>,
    pub namespace: Option<String>,
    /// Default KV v2 mount for scopes that do not carry their own.
    pub mount: String,
}

impl VaultSettings {
    pub fn from_env() -> Result<Self, StoreError> {
        let address = std::env::var("VAULT_ADDR").map_err(|_| {
            StoreError::transport(BACKEND, "VAULT_ADDR is not set")
        })?;
        Ok(Self {
            address,
            token: std::env::var("VAULT_TOKEN").ok(),
            namespace: std::env::var("VAULT_NAMESPACE").ok(),
            mount: std::env::var("VAULT_KV_MOUNT").unwrap_or_else(|_| "secret".to_string()),
        })
    }
}

pub struct VaultStore {
    client: VaultClient,
    mount: String,
}

impl VaultStore {
    pub fn new(settings: VaultSettings) -> Result<Self, StoreError> {
        let mut builder = VaultClientSettingsBuilder::default();
        builder.address(&settings.address);
        if let Some(ref token) = settings.token {
            builder.token(token);
        }
        if let Some(ref namespace) = settings.namespace {
            builder.namespace(Some(namespace.clone()));
        }
        let client_settings = builder
            .build()
            .map_err(|e| StoreError::transport(BACKEND, format!("invalid settings: {e}")))?;
        let client = VaultClient::new(client_settings)
            .map_err(|e| StoreError::transport(BACKEND, format!("client setup failed: {e}")))?;
        Ok(Self { client, mount: settings.mount })
    }

    /// Split a scope into `(mount, path)`. `secret/data/a/b` is the KV v2
    /// API-path spelling of path `a/b` under mount `secret`.
    fn parse_scope<'a>(&'a self, scope: &'a str) -> (&'a str, &'a str) {
        if let Some(idx) = scope.find("/data/") {
            let (mount, rest) = scope.split_at(idx);
            (mount, &rest["/data/".len()..])
        } else {
            (self.mount.as_str(), scope)
        }
    }

    async fn read_map(
        &self,
        scope: &str,
    ) -> Result<Option<HashMap<String, serde_json::Value>>, StoreError> {
        let (mount, path) = self.parse_scope(scope);
        match kv2::read::<HashMap<String, serde_json::Value>>(&self.client, mount, path).await {
            Ok(data) => Ok(Some(data)),
            Err(ClientError::APIError { code: 404, .. }) => Ok(None),
            Err(e) => Err(StoreError::transport(BACKEND, format!("read {scope} failed: {e}"))),
        }
    }
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SecretStore for VaultStore {
    async fn get_value(
        &self,
        _location: &str,
        scope: &str,
        property: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .read_map(scope)
            .await?
            .and_then(|data| data.get(property).map(value_to_string)))
    }

    async fn set_value(
        &self,
        _location: &str,
        scope: &str,
        property: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        // KV v2 writes replace the whole secret, so merge with what's there.
        let mut data = self.read_map(scope).await?.unwrap_or_default();
        data.insert(property.to_string(), serde_json::Value::String(value.to_string()));

        let (mount, path) = self.parse_scope(scope);
        debug!(scope = %scope, property = %property, "writing vault secret");
        kv2::set(&self.client, mount, path, &data)
            .await
            .map_err(|e| StoreError::WriteConflict {
                backend: BACKEND,
                scope: scope.to_string(),
                property: property.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn get_properties(
        &self,
        _location: &str,
        scope: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        Ok(self.read_map(scope).await?.map(|data| {
            data.iter().map(|(k, v)| (k.clone(), value_to_string(v))).collect()
        }))
    }

    async fn list(&self, _location: &str) -> Result<Vec<String>, StoreError> {
        match kv2::list(&self.client, &self.mount, "").await {
            Ok(mut keys) => {
                keys.sort();
                Ok(keys)
            }
            Err(ClientError::APIError { code: 404, .. }) => Ok(Vec::new()),
            Err(e) => Err(StoreError::transport(BACKEND, format!("list failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> VaultStore {
        VaultStore::new(VaultSettings {
            address: "http://127.0.0.1:8200".to_string(),
            token: Some("root".to_string()),
            namespace: None,
            mount: "secret".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_scope_mount_qualified() {
        let store = store();
        let (mount, path) = store.parse_scope("secret/data/platform/adminUser");
        assert_eq!(mount, "secret");
        assert_eq!(path, "platform/adminUser");
    }

    #[test]
    fn test_parse_scope_bare_path_uses_default_mount() {
        let store = store();
        let (mount, path) = store.parse_scope("platform/adminUser");
        assert_eq!(mount, "secret");
        assert_eq!(path, "platform/adminUser");
    }

    #[test]
    fn test_value_to_string_keeps_raw_strings() {
        assert_eq!(value_to_string(&serde_json::json!("plain")), "plain");
        assert_eq!(value_to_string(&serde_json::json!(42)), "42");
    }
}
