//! # Secret Store Abstraction
//!
//! A uniform interface over the supported secret store backends. Every value
//! is addressed by the triple `(location, scope, property)`:
//!
//! - `location` — backend instance: GCP project, Key Vault name, Kubernetes
//!   namespace; empty for Vault (one configured server).
//! - `scope` — the secret within the backend: a Vault path, a flat secret
//!   name, a Kubernetes Secret name.
//! - `property` — the field within the scope. Flat-named backends fold the
//!   property into the stored name.
//!
//! Absence is never an error: `get_value` returns `Ok(None)` and only
//! transport/auth failures surface as [`StoreError`]. Writes are idempotent
//! upserts and create the scope when the backend requires explicit creation.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::crd::BackendType;
use crate::error::StoreError;

pub mod azure;
pub mod fake;
pub mod gsm;
pub mod kubernetes;
pub mod vault;

/// Backend-agnostic secret store contract.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read one property. Absence returns `Ok(None)`.
    async fn get_value(
        &self,
        location: &str,
        scope: &str,
        property: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Idempotent upsert of one property, creating the scope if needed.
    async fn set_value(
        &self,
        location: &str,
        scope: &str,
        property: &str,
        value: &str,
    ) -> Result<(), StoreError>;

    /// Full property map of one scope, for snapshotting template inputs.
    /// Backends that cannot enumerate a scope return `Unsupported`.
    async fn get_properties(
        &self,
        location: &str,
        scope: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError>;

    /// Known scopes at a location, used to detect previously-populated
    /// destinations.
    async fn list(&self, location: &str) -> Result<Vec<String>, StoreError>;
}

/// Creates (and may cache) one store client per backend/location pair.
#[async_trait]
pub trait SecretStoreFactory: Send + Sync {
    async fn create(
        &self,
        backend: BackendType,
        location: &str,
    ) -> Result<Arc<dyn SecretStore>, StoreError>;
}

/// Production factory: builds the real backend clients, one per
/// backend/location pair, reused for the rest of the run.
pub struct RuntimeStoreFactory {
    kube_client: kube::Client,
    /// Explicit Vault settings; `None` reads the `VAULT_*` environment when
    /// the first vault definition appears.
    vault: Option<vault::VaultSettings>,
    cache: Mutex<HashMap<(BackendType, String), Arc<dyn SecretStore>>>,
}

impl RuntimeStoreFactory {
    pub fn new(kube_client: kube::Client, vault: Option<vault::VaultSettings>) -> Self {
        Self { kube_client, vault, cache: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl SecretStoreFactory for RuntimeStoreFactory {
    async fn create(
        &self,
        backend: BackendType,
        location: &str,
    ) -> Result<Arc<dyn SecretStore>, StoreError> {
        let key = (backend, location.to_string());
        let mut cache = self.cache.lock().await;
        if let Some(store) = cache.get(&key) {
            return Ok(Arc::clone(store));
        }

        debug!(backend = %backend, location = %location, "creating secret store client");
        let store: Arc<dyn SecretStore> = match backend {
            BackendType::Vault => {
                let settings = match self.vault {
                    Some(ref settings) => settings.clone(),
                    None => vault::VaultSettings::from_env()?,
                };
                Arc::new(vault::VaultStore::new(settings)?)
            }
            BackendType::GoogleSecretManager => {
                Arc::new(gsm::GoogleSecretManagerStore::new(location.to_string()).await?)
            }
            BackendType::AzureKeyVault => {
                Arc::new(azure::AzureKeyVaultStore::new(location.to_string())?)
            }
            BackendType::Kubernetes => {
                Arc::new(kubernetes::KubernetesStore::new(self.kube_client.clone()))
            }
        };
        cache.insert(key, Arc::clone(&store));
        Ok(store)
    }
}
