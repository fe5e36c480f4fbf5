//! JSON-file identity store implementation.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::core::error::Result;

use super::traits::{DeviceIdentity, IdentityStore};

/// Identity store backed by a single JSON file.
///
/// The file holds a key-to-identity map and is rewritten whole on every
/// save. A missing file reads as an empty store, so nothing needs to be
/// created up front.
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_map(&self) -> Result<BTreeMap<String, DeviceIdentity>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_map(&self, map: &BTreeMap<String, DeviceIdentity>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(map)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn save(&self, key: &str, identity: &DeviceIdentity) -> Result<()> {
        let mut map = self.read_map().await?;
        map.insert(key.to_owned(), identity.clone());
        self.write_map(&map).await
    }

    async fn load(&self, key: &str) -> Result<Option<DeviceIdentity>> {
        Ok(self.read_map().await?.remove(key))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.read_map().await?;
        if map.remove(key).is_some() {
            self.write_map(&map).await?;
        }
        Ok(())
    }
}
