//! In-memory identity store implementation using DashMap.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::error::Result;

use super::traits::{DeviceIdentity, IdentityStore};

/// In-memory identity store using DashMap for concurrent access.
///
/// This is the default backend for standalone usage and tests. Nothing
/// survives process restart; use
/// [`FileIdentityStore`](super::FileIdentityStore) for that.
///
/// # Example
///
/// ```rust
/// use devhal::store::MemoryIdentityStore;
///
/// let store = MemoryIdentityStore::new();
/// ```
pub struct MemoryIdentityStore {
    entries: DashMap<String, DeviceIdentity>,
}

impl MemoryIdentityStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for MemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn save(&self, key: &str, identity: &DeviceIdentity) -> Result<()> {
        self.entries.insert(key.to_owned(), identity.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<DeviceIdentity>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = MemoryIdentityStore::new();
        let identity = DeviceIdentity::new(0x04E8, 0x6860, Some("Galaxy".into()));

        store.save("adb_device_info", &identity).await.unwrap();
        let loaded = store.load("adb_device_info").await.unwrap();
        assert_eq!(loaded, Some(identity));
    }

    #[tokio::test]
    async fn missing_key_loads_none() {
        let store = MemoryIdentityStore::new();
        assert_eq!(store.load("adb_device_info").await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_overwrites_previous_identity() {
        let store = MemoryIdentityStore::new();
        store
            .save("adb_device_info", &DeviceIdentity::new(1, 1, None))
            .await
            .unwrap();
        store
            .save("adb_device_info", &DeviceIdentity::new(2, 2, None))
            .await
            .unwrap();

        let loaded = store.load("adb_device_info").await.unwrap().unwrap();
        assert!(loaded.matches(2, 2));
    }

    #[tokio::test]
    async fn remove_forgets_the_identity() {
        let store = MemoryIdentityStore::new();
        store
            .save("adb_device_info", &DeviceIdentity::new(1, 1, None))
            .await
            .unwrap();
        store.remove("adb_device_info").await.unwrap();
        assert_eq!(store.load("adb_device_info").await.unwrap(), None);

        // Removing a missing key is not an error.
        store.remove("adb_device_info").await.unwrap();
    }
}
