//! # Device HAL (devhal)
//!
//! A hardware abstraction layer for heterogeneous device access, providing
//! one uniform driver contract over serial, USB and remote HTTP transports.
//!
//! ## Features
//!
//! - **Uniform Driver Contract**: detect / connect / disconnect, plus
//!   capability-gated read and write
//! - **Native-First Fallback**: hybrid descriptors fail over from the local
//!   transport to a remote HTTP endpoint inside a single connect call
//! - **Typed Events**: registration, connection and failure events on a
//!   broadcast channel
//! - **Transport Agnostic Core**: drivers speak framed byte channels, so
//!   tests run against in-memory transports
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use devhal::prelude::*;
//! use devhal::drivers::ModbusRtuDriver;
//! use serde_json::json;
//!
//! let broker = ConnectionBroker::new();
//! broker
//!     .register(
//!         DriverDescriptor::new("meter", TransportKind::Native, "1.0.0"),
//!         Some(Box::new(ModbusRtuDriver::new())),
//!     )
//!     .await?;
//!
//! // Connect, read two holding registers, disconnect.
//! let outcome = broker
//!     .connect("meter", &json!({ "port": "/dev/ttyUSB0", "slaveId": 5 }))
//!     .await?;
//! println!("connected via {}", outcome.method);
//! let payload = broker.read("meter", &json!({ "address": 0, "quantity": 2 })).await?;
//! broker.disconnect("meter").await?;
//! ```
//!
//! ## Built-in Drivers
//!
//! | Driver | Transport | Notes |
//! |--------|-----------|-------|
//! | `modbus_rtu` | Serial, RTU framing | FC 0x03 reads, FC 0x06 writes |
//! | `adb` | USB bulk endpoints | ADB message protocol handshake |
//! | `remote` | HTTP endpoint | JSON action passthrough |

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod broker;
pub mod codec;
pub mod core;
pub mod drivers;
pub mod registry;
pub mod store;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::broker::ConnectionBroker;
    pub use crate::core::{
        error::{HalError, Result},
        traits::*,
    };
    pub use crate::registry::DriverRegistry;
    pub use crate::store::{IdentityStore, MemoryIdentityStore};
}

// Re-export core types at crate root for convenience
pub use crate::broker::ConnectionBroker;
pub use crate::core::error::{HalError, Result};
pub use crate::core::traits::{
    ConnectMethod, ConnectOutcome, ConnectionState, DescriptorSnapshot, Driver,
    DriverCapabilities, DriverDescriptor, HalEvent, ReadPayload, TransportKind, WriteAck,
};
pub use crate::registry::DriverRegistry;

// Re-export store types
pub use crate::store::{DeviceIdentity, IdentityStore, MemoryIdentityStore};
