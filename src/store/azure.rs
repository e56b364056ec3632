//! # Azure Key Vault Store
//!
//! Flat-named backend: Key Vault secrets are single string values, so the
//! `(scope, property)` pair folds into one secret named `scope-property`,
//! sanitized to the letter/digit/hyphen set Key Vault accepts.
//!
//! Authentication goes through `DeveloperToolsCredential`, the GA credential
//! chain that tries the Azure CLI and the Azure Developer CLI in that order.

use async_trait::async_trait;
use azure_identity::DeveloperToolsCredential;
use azure_security_keyvault_secrets::{models::SetSecretParameters, SecretClient};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::SecretStore;
use crate::error::StoreError;

const BACKEND: &str = "azureKeyVault";

pub struct AzureKeyVaultStore {
    client: SecretClient,
}

/// Fold a `(scope, property)` pair into one Key Vault secret name.
fn fold_name(scope: &str, property: &str) -> String {
    let raw = if property.is_empty() {
        scope.to_string()
    } else {
        format!("{scope}-{property}")
    };
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

fn is_not_found(message: &str) -> bool {
    message.contains("SecretNotFound")
        || message.contains("404")
        || message.contains("not found")
}

impl AzureKeyVaultStore {
    /// `location` is the Key Vault name, or a full `https://` vault URL.
    pub fn new(location: String) -> Result<Self, StoreError> {
        let vault_url = if location.starts_with("https://") {
            location
        } else {
            format!("https://{location}.vault.azure.net/")
        };

        let credential = DeveloperToolsCredential::new(None)
            .map_err(|e| StoreError::transport(BACKEND, format!("credential: {e}")))?;
        let client = SecretClient::new(&vault_url, credential, None)
            .map_err(|e| StoreError::transport(BACKEND, format!("client setup: {e}")))?;

        info!(vault_url = %vault_url, "initialized Azure Key Vault store");
        Ok(Self { client })
    }
}

#[async_trait]
impl SecretStore for AzureKeyVaultStore {
    async fn get_value(
        &self,
        _location: &str,
        scope: &str,
        property: &str,
    ) -> Result<Option<String>, StoreError> {
        let name = fold_name(scope, property);
        // Omitting the version in the options selects the current version.
        match self.client.get_secret(&name, None).await {
            Ok(response) => {
                let secret = response.into_model().map_err(|e| {
                    StoreError::transport(BACKEND, format!("decode {name}: {e}"))
                })?;
                Ok(secret.value)
            }
            Err(e) if is_not_found(&e.to_string()) => Ok(None),
            Err(e) => Err(StoreError::transport(BACKEND, format!("get {name}: {e}"))),
        }
    }

    async fn set_value(
        &self,
        _location: &str,
        scope: &str,
        property: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let name = fold_name(scope, property);
        debug!(name = %name, "setting key vault secret");
        let mut parameters = SetSecretParameters::default();
        parameters.value = Some(value.to_string());
        let body = parameters.try_into().map_err(|e| {
            StoreError::transport(BACKEND, format!("encode {name}: {e}"))
        })?;
        self.client.set_secret(&name, body, None).await.map_err(|e| {
            StoreError::WriteConflict {
                backend: BACKEND,
                scope: scope.to_string(),
                property: property.to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(())
    }

    async fn get_properties(
        &self,
        _location: &str,
        _scope: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        // Folded names erase the scope/property split, so a scope cannot be
        // enumerated back into its properties.
        Err(StoreError::Unsupported { backend: BACKEND, operation: "get_properties" })
    }

    async fn list(&self, _location: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unsupported { backend: BACKEND, operation: "list" })
    }
}
