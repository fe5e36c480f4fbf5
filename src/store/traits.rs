//! IdentityStore trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::Result;

/// Identity of a device that connected successfully, persisted so the
/// next connection can prefer the same hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_name: Option<String>,
    pub saved_at: DateTime<Utc>,
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16, product_name: Option<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            product_name,
            saved_at: Utc::now(),
        }
    }

    /// Whether this identity refers to the given vendor/product pair.
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

/// Trait for identity storage backends.
///
/// This trait abstracts the persistence layer, allowing drivers to
/// remember devices through different backends (memory, file, etc.)
/// without changing the connection logic.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Persist an identity under a well-known key.
    ///
    /// # Arguments
    ///
    /// * `key` - The settings key, e.g. `"adb_device_info"`
    /// * `identity` - The identity to persist
    async fn save(&self, key: &str, identity: &DeviceIdentity) -> Result<()>;

    /// Load the identity stored under a key, if any.
    async fn load(&self, key: &str) -> Result<Option<DeviceIdentity>>;

    /// Forget the identity stored under a key.
    async fn remove(&self, key: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_matches_on_ids_only() {
        let identity = DeviceIdentity::new(0x04E8, 0x6860, Some("Galaxy".into()));
        assert!(identity.matches(0x04E8, 0x6860));
        assert!(!identity.matches(0x04E8, 0x6861));
        assert!(!identity.matches(0x18D1, 0x6860));
    }

    #[test]
    fn identity_serializes_camel_case() {
        let identity = DeviceIdentity::new(1, 2, None);
        let value = serde_json::to_value(&identity).unwrap();
        assert_eq!(value["vendorId"], 1);
        assert_eq!(value["productId"], 2);
        assert!(value.get("savedAt").is_some());
    }
}
