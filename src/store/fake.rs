//! In-memory store used by the populate tests. One instance is shared across
//! every backend/location so a test can seed sources, inject faults, and
//! inspect destinations through the same handle.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{SecretStore, SecretStoreFactory};
use crate::crd::BackendType;
use crate::error::StoreError;

type Key = (String, String, String);

#[derive(Default)]
pub struct FakeSecretStore {
    values: Mutex<BTreeMap<Key, String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    read_faults: Mutex<VecDeque<StoreError>>,
    write_faults: Mutex<VecDeque<StoreError>>,
}

impl FakeSecretStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, location: &str, scope: &str, property: &str, value: &str) {
        self.values.lock().expect("fake store lock").insert(
            (location.to_string(), scope.to_string(), property.to_string()),
            value.to_string(),
        );
    }

    pub fn value(&self, location: &str, scope: &str, property: &str) -> Option<String> {
        self.values
            .lock()
            .expect("fake store lock")
            .get(&(location.to_string(), scope.to_string(), property.to_string()))
            .cloned()
    }

    /// Queue an error returned by the next read (`get_value`,
    /// `get_properties`, or `list`), in queue order.
    pub fn fail_next_read(&self, error: StoreError) {
        self.read_faults.lock().expect("fake store lock").push_back(error);
    }

    /// Queue an error returned by the next `set_value`.
    pub fn fail_next_write(&self, error: StoreError) {
        self.write_faults.lock().expect("fake store lock").push_back(error);
    }

    fn take_read_fault(&self) -> Option<StoreError> {
        self.read_faults.lock().expect("fake store lock").pop_front()
    }

    fn take_write_fault(&self) -> Option<StoreError> {
        self.write_faults.lock().expect("fake store lock").pop_front()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    #[track_caller]
    pub fn assert_value_equals(&self, location: &str, scope: &str, property: &str, expected: &str) {
        let actual = self.value(location, scope, property);
        assert_eq!(
            actual.as_deref(),
            Some(expected),
            "expected {location}/{scope}#{property} to equal {expected:?}, got {actual:?}"
        );
    }

    #[track_caller]
    pub fn assert_has_value(&self, location: &str, scope: &str, property: &str) {
        let actual = self.value(location, scope, property);
        assert!(
            actual.as_deref().is_some_and(|v| !v.is_empty()),
            "expected {location}/{scope}#{property} to be populated, got {actual:?}"
        );
    }

    #[track_caller]
    pub fn assert_no_value(&self, location: &str, scope: &str, property: &str) {
        let actual = self.value(location, scope, property);
        assert!(
            actual.is_none(),
            "expected {location}/{scope}#{property} to be absent, got {actual:?}"
        );
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn get_value(
        &self,
        location: &str,
        scope: &str,
        property: &str,
    ) -> Result<Option<String>, StoreError> {
        if let Some(error) = self.take_read_fault() {
            return Err(error);
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.value(location, scope, property))
    }

    async fn set_value(
        &self,
        location: &str,
        scope: &str,
        property: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        if let Some(error) = self.take_write_fault() {
            return Err(error);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.seed(location, scope, property, value);
        Ok(())
    }

    async fn get_properties(
        &self,
        location: &str,
        scope: &str,
    ) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        if let Some(error) = self.take_read_fault() {
            return Err(error);
        }
        let values = self.values.lock().expect("fake store lock");
        let map: BTreeMap<String, String> = values
            .iter()
            .filter(|((l, s, _), _)| l == location && s == scope)
            .map(|((_, _, p), v)| (p.clone(), v.clone()))
            .collect();
        if map.is_empty() {
            Ok(None)
        } else {
            Ok(Some(map))
        }
    }

    async fn list(&self, location: &str) -> Result<Vec<String>, StoreError> {
        if let Some(error) = self.take_read_fault() {
            return Err(error);
        }
        let values = self.values.lock().expect("fake store lock");
        let mut scopes: Vec<String> = values
            .keys()
            .filter(|(l, _, _)| l == location)
            .map(|(_, s, _)| s.clone())
            .collect();
        scopes.dedup();
        Ok(scopes)
    }
}

/// Factory handing out one shared [`FakeSecretStore`] for every
/// backend/location pair.
pub struct FakeSecretStoreFactory {
    store: Arc<FakeSecretStore>,
}

impl FakeSecretStoreFactory {
    pub fn new(store: Arc<FakeSecretStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SecretStoreFactory for FakeSecretStoreFactory {
    async fn create(
        &self,
        _backend: BackendType,
        _location: &str,
    ) -> Result<Arc<dyn SecretStore>, StoreError> {
        Ok(Arc::clone(&self.store) as Arc<dyn SecretStore>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_counters() {
        let store = FakeSecretStore::new();
        store.set_value("ns", "adminUser", "username", "admin").await.unwrap();

        assert_eq!(store.get_value("ns", "adminUser", "username").await.unwrap().as_deref(), Some("admin"));
        assert_eq!(store.get_value("ns", "adminUser", "password").await.unwrap(), None);
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test]
    async fn test_get_properties_groups_by_scope() {
        let store = FakeSecretStore::new();
        store.seed("ns", "adminUser", "username", "admin");
        store.seed("ns", "adminUser", "password", "pw");
        store.seed("ns", "other", "token", "t");

        let props = store.get_properties("ns", "adminUser").await.unwrap().unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props.get("password").map(String::as_str), Some("pw"));

        assert!(store.get_properties("ns", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_faults_fire_once_in_order() {
        let store = FakeSecretStore::new();
        store.seed("ns", "adminUser", "username", "admin");
        store.fail_next_read(StoreError::transport("kubernetes", "connection reset"));
        store.fail_next_write(StoreError::transport("kubernetes", "connection reset"));

        assert!(store.get_value("ns", "adminUser", "username").await.is_err());
        assert_eq!(
            store.get_value("ns", "adminUser", "username").await.unwrap().as_deref(),
            Some("admin")
        );

        assert!(store.set_value("ns", "adminUser", "password", "pw").await.is_err());
        store.set_value("ns", "adminUser", "password", "pw").await.unwrap();
        store.assert_value_equals("ns", "adminUser", "password", "pw");
    }

    #[tokio::test]
    async fn test_list_scopes_at_location() {
        let store = FakeSecretStore::new();
        store.seed("ns", "b", "k", "1");
        store.seed("ns", "a", "k", "1");
        store.seed("elsewhere", "c", "k", "1");

        assert_eq!(store.list("ns").await.unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
