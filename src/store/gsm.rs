//! # Google Secret Manager Store
//!
//! Flat-named backend: a scope maps to one Secret Manager secret whose latest
//! version holds a JSON object of properties. Path-style scopes are sanitized
//! to the `[a-zA-Z0-9_-]` character set Secret Manager accepts.
//!
//! Authentication uses a service account key from
//! `GOOGLE_APPLICATION_CREDENTIALS`; connection setup beyond that is the
//! SDK's concern.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info};

use google_secretmanager1::api::{
    AddSecretVersionRequest, Automatic, Replication, Secret, SecretPayload,
};
use google_secretmanager1::{hyper_rustls, hyper_util, SecretManager};

use super::SecretStore;
use crate::error::StoreError;

const BACKEND: &str = "gcpSecretsManager";

type Hub = SecretManager<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
>;

pub struct GoogleSecretManagerStore {
    hub: Hub,
    project_id: String,
}

/// Replace characters Secret Manager rejects in secret ids.
fn sanitize_secret_id(scope: &str) -> String {
    scope
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

fn is_not_found(message: &str) -> bool {
    message.contains("NOT_FOUND") || message.contains("404")
}

impl GoogleSecretManagerStore {
    pub async fn new(project_id: String) -> Result<Self, StoreError> {
        let client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .build(
                    hyper_rustls::HttpsConnectorBuilder::new()
                        .with_native_roots()
                        .map_err(|e| {
                            StoreError::transport(BACKEND, format!("tls roots: {e}"))
                        })?
                        .https_or_http()
                        .enable_http2()
                        .build(),
                );

        let key_path = std::env::var("GOOGLE_APPLICATION_CREDENTIALS").map_err(|_| {
            StoreError::transport(BACKEND, "GOOGLE_APPLICATION_CREDENTIALS is not set")
        })?;
        let key = yup_oauth2::read_service_account_key(key_path)
            .await
            .map_err(|e| StoreError::transport(BACKEND, format!("credentials: {e}")))?;
        let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| StoreError::transport(BACKEND, format!("authenticator: {e}")))?;

        let hub = SecretManager::new(client, auth);
        info!(project_id = %project_id, "initialized Google Secret Manager store");
        Ok(Self { hub, project_id })
    }

    fn parent(&self) -> String {
        format!("projects/{}", self.project_id)
    }

    fn version_name(&self, scope: &str) -> String {
        format!(
            "projects/{}/secrets/{}/versions/latest",
            self.project_id,
            sanitize_secret_id(scope)
        )
    }

    async fn read_map(
        &self,
        scope: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        let name = self.version_name(scope);
        match self.hub.projects().secrets_versions_access(&name).doit().await {
            Ok((_, response)) => {
                let data = response.payload.and_then(|p| p.data).unwrap_or_default();
                if data.is_empty() {
                    return Ok(Some(BTreeMap::new()));
                }
                match serde_json::from_slice::<BTreeMap<String, String>>(&data) {
                    Ok(map) => Ok(Some(map)),
                    // Single-blob secret: expose it under an empty property
                    // name, matching the "single blob or JSON-field access"
                    // contract.
                    Err(_) => {
                        let raw = String::from_utf8_lossy(&data).to_string();
                        Ok(Some(BTreeMap::from([(String::new(), raw)])))
                    }
                }
            }
            Err(e) if is_not_found(&e.to_string()) => Ok(None),
            Err(e) => Err(StoreError::transport(BACKEND, format!("access {scope}: {e}"))),
        }
    }

    async fn ensure_secret(&self, scope: &str) -> Result<(), StoreError> {
        let secret = Secret {
            replication: Some(Replication {
                automatic: Some(Automatic::default()),
                ..Default::default()
            }),
            ..Default::default()
        };
        match self
            .hub
            .projects()
            .secrets_create(secret, &self.parent())
            .secret_id(&sanitize_secret_id(scope))
            .doit()
            .await
        {
            Ok(_) => {
                debug!(scope = %scope, "created Secret Manager secret");
                Ok(())
            }
            Err(e) if e.to_string().contains("ALREADY_EXISTS") => Ok(()),
            Err(e) => Err(StoreError::transport(BACKEND, format!("create {scope}: {e}"))),
        }
    }
}

#[async_trait]
impl SecretStore for GoogleSecretManagerStore {
    async fn get_value(
        &self,
        _location: &str,
        scope: &str,
        property: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.read_map(scope).await?.and_then(|map| map.get(property).cloned()))
    }

    async fn set_value(
        &self,
        _location: &str,
        scope: &str,
        property: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut map = self.read_map(scope).await?.unwrap_or_default();
        if map.is_empty() {
            self.ensure_secret(scope).await?;
        }
        map.insert(property.to_string(), value.to_string());

        let payload = serde_json::to_vec(&map)
            .map_err(|e| StoreError::transport(BACKEND, format!("encode {scope}: {e}")))?;
        let request = AddSecretVersionRequest {
            payload: Some(SecretPayload { data: Some(payload), ..Default::default() }),
            ..Default::default()
        };
        let parent = format!("{}/secrets/{}", self.parent(), sanitize_secret_id(scope));
        debug!(scope = %scope, property = %property, "adding secret version");
        self.hub
            .projects()
            .secrets_add_version(request, &parent)
            .doit()
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
        self.read_map(scope).await
    }

    async fn list(&self, _location: &str) -> Result<Vec<String>, StoreError> {
        match self.hub.projects().secrets_list(&self.parent()).doit().await {
            Ok((_, response)) => {
                let mut names: Vec<String> = response
                    .secrets
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|s| s.name)
                    .filter_map(|n| n.rsplit('/').next().map(str::to_string))
                    .collect();
                names.sort();
                Ok(names)
            }
            Err(e) => Err(StoreError::transport(BACKEND, format!("list: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_secret_id() {
        assert_eq!(
            sanitize_secret_id("secret/data/platform/adminUser"),
            "secret-data-platform-adminUser"
        );
        assert_eq!(sanitize_secret_id("plain-name"), "plain-name");
        assert_eq!(sanitize_secret_id("/leading/trailing/"), "leading-trailing");
    }

    #[test]
    fn test_not_found_classification() {
        assert!(is_not_found("Bad status: 404 Not Found"));
        assert!(is_not_found("rpc error: NOT_FOUND: secret missing"));
        assert!(!is_not_found("PERMISSION_DENIED"));
    }
}
