//! # Kubernetes Secret Store
//!
//! Stores values in `v1/Secret` objects: the location is the namespace, the
//! scope is the Secret name, and the property is a key in its `data` map.
//! This is both a population destination and the source backend the
//! templater snapshots.

use async_trait::async_trait;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ListParams, Patch, PatchParams};
use std::collections::BTreeMap;
use tracing::debug;

use super::SecretStore;
use crate::error::StoreError;

const BACKEND: &str = "kubernetes";
const FIELD_MANAGER: &str = "secret-populator";

pub struct KubernetesStore {
    client: kube::Client,
}

impl KubernetesStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        match self.api(namespace).get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(StoreError::transport(
                BACKEND,
                format!("get {namespace}/{name}: {e}"),
            )),
        }
    }
}

fn decode_data(secret: &Secret) -> BTreeMap<String, String> {
    secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).to_string()))
        .collect()
}

#[async_trait]
impl SecretStore for KubernetesStore {
    async fn get_value(
        &self,
        location: &str,
        scope: &str,
        property: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .get_secret(location, scope)
            .await?
            .and_then(|s| decode_data(&s).remove(property)))
    }

    async fn set_value(
        &self,
        location: &str,
        scope: &str,
        property: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let api = self.api(location);
        let exists = self.get_secret(location, scope).await?.is_some();

        if exists {
            debug!(namespace = %location, name = %scope, key = %property, "patching secret");
            let encoded = base64::engine::general_purpose::STANDARD.encode(value);
            let patch = serde_json::json!({ "data": { property: encoded } });
            api.patch(scope, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                .await
                .map_err(|e| StoreError::WriteConflict {
                    backend: BACKEND,
                    scope: scope.to_string(),
                    property: property.to_string(),
                    message: e.to_string(),
                })?;
        } else {
            debug!(namespace = %location, name = %scope, key = %property, "creating secret");
            let mut data = BTreeMap::new();
            data.insert(property.to_string(), ByteString(value.as_bytes().to_vec()));
            let secret = Secret {
                metadata: kube::api::ObjectMeta {
                    name: Some(scope.to_string()),
                    namespace: Some(location.to_string()),
                    ..Default::default()
                },
                data: Some(data),
                ..Default::default()
            };
            api.create(&Default::default(), &secret).await.map_err(|e| {
                StoreError::WriteConflict {
                    backend: BACKEND,
                    scope: scope.to_string(),
                    property: property.to_string(),
                    message: e.to_string(),
                }
            })?;
        }
        Ok(())
    }

    async fn get_properties(
        &self,
        location: &str,
        scope: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        Ok(self.get_secret(location, scope).await?.map(|s| decode_data(&s)))
    }

    async fn list(&self, location: &str) -> Result<Vec<String>, StoreError> {
        let secrets = self
            .api(location)
            .list(&ListParams::default())
            .await
            .map_err(|e| StoreError::transport(BACKEND, format!("list {location}: {e}")))?;
        let mut names: Vec<String> = secrets
            .items
            .into_iter()
            .filter_map(|s| s.metadata.name)
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_data_reads_byte_values() {
        let mut data = BTreeMap::new();
        data.insert("username".to_string(), ByteString(b"admin".to_vec()));
        data.insert("password".to_string(), ByteString(b"s3cret".to_vec()));
        let secret = Secret { data: Some(data), ..Default::default() };

        let decoded = decode_data(&secret);
        assert_eq!(decoded.get("username").map(String::as_str), Some("admin"));
        assert_eq!(decoded.get("password").map(String::as_str), Some("s3cret"));
    }

    #[test]
    fn test_decode_data_empty_secret() {
        let secret = Secret::default();
        assert!(decode_data(&secret).is_empty());
    }
}
