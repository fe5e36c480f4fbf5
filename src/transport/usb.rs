//! USB backend abstraction for bulk-transfer protocols.
//!
//! Enumeration and bulk I/O sit behind the [`UsbBackend`] and
//! [`UsbDeviceHandle`] traits so drivers can run against real hardware
//! or a scripted peer without caring which.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;

/// USB interface class triple used to recognize protocol endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbInterfaceClass {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// Vendor-specific class triple ADB interfaces advertise.
pub const ADB_INTERFACE: UsbInterfaceClass = UsbInterfaceClass {
    class: 0xFF,
    subclass: 0x42,
    protocol: 0x01,
};

/// One enumerated USB device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_name: Option<String>,
    pub interfaces: Vec<UsbInterfaceClass>,
}

impl UsbDeviceInfo {
    /// Whether any interface advertises the ADB class triple.
    pub fn supports_adb(&self) -> bool {
        self.interfaces.contains(&ADB_INTERFACE)
    }

    /// Short label for logs: `04e8:6860 (Galaxy)` or `04e8:6860`.
    pub fn label(&self) -> String {
        match &self.product_name {
            Some(name) => format!("{:04x}:{:04x} ({name})", self.vendor_id, self.product_id),
            None => format!("{:04x}:{:04x}", self.vendor_id, self.product_id),
        }
    }
}

/// Enumerates devices and opens handles to them.
#[async_trait]
pub trait UsbBackend: Send + Sync {
    /// Snapshot of currently attached devices.
    async fn devices(&self) -> Result<Vec<UsbDeviceInfo>>;

    /// Open a handle to one enumerated device.
    async fn open(&self, info: &UsbDeviceInfo) -> Result<Box<dyn UsbDeviceHandle>>;
}

/// An open device: claim its protocol interface, move bytes, release.
#[async_trait]
pub trait UsbDeviceHandle: Send + Sync {
    fn info(&self) -> &UsbDeviceInfo;

    /// Claim the ADB interface. Fails with
    /// [`HalError::NoAdbInterface`](crate::core::HalError::NoAdbInterface)
    /// when the device does not expose one.
    async fn claim_adb_interface(&mut self) -> Result<()>;

    /// Bulk write to the claimed interface's OUT endpoint.
    async fn bulk_out(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Bulk read of up to `max_len` bytes from the IN endpoint.
    async fn bulk_in(&mut self, max_len: usize) -> Result<Vec<u8>>;

    /// Release the claimed interface. Safe to call more than once.
    async fn release(&mut self) -> Result<()>;
}
