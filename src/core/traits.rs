//! Core driver contract.
//!
//! Every device family implements [`Driver`]: `detect`, `connect` and
//! `disconnect` are required; `read` and `write` default to
//! [`HalError::UnsupportedOperation`] so capability gaps fail loudly instead
//! of hanging. Descriptors carry the static facts the registry and broker
//! need (transport kind, capability flags, optional remote endpoint);
//! mutable session state lives in the registry, never in the descriptor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::core::error::{HalError, Result};

/// How a driver reaches its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process transport only (serial port, USB handle).
    Native,
    /// Remote HTTP endpoint only; a native connect is never attempted.
    Remote,
    /// Native preferred, remote endpoint used as fallback on failure.
    Hybrid,
}

impl TransportKind {
    /// Whether a native connect attempt is permitted.
    pub fn allows_native(&self) -> bool {
        matches!(self, Self::Native | Self::Hybrid)
    }

    /// Whether the remote endpoint may be used.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, Self::Remote | Self::Hybrid)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Remote => write!(f, "remote"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Connection lifecycle of a single driver session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Transport is open but the device still requires on-device
    /// authorization (ADB `AUTH` reply).
    AwaitingAuth,
    Error,
}

impl ConnectionState {
    /// True when a transport is open, even if authorization is pending.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::AwaitingAuth)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::AwaitingAuth => write!(f, "awaiting_auth"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Optional capability flags declared by a descriptor.
///
/// `detect`, `connect` and `disconnect` are required of every driver and
/// have no flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverCapabilities {
    pub read: bool,
    pub write: bool,
}

impl DriverCapabilities {
    pub const fn read_write() -> Self {
        Self {
            read: true,
            write: true,
        }
    }

    pub const fn read_only() -> Self {
        Self {
            read: true,
            write: false,
        }
    }

    pub const fn none() -> Self {
        Self {
            read: false,
            write: false,
        }
    }
}

impl Default for DriverCapabilities {
    fn default() -> Self {
        Self::read_write()
    }
}

/// Remote fallback endpoint configuration carried by a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEndpointConfig {
    /// Base URL the wire-contract POSTs go to.
    pub url: String,
    /// Request timeout in milliseconds.
    #[serde(default = "default_remote_timeout_ms", alias = "timeout")]
    pub timeout_ms: u64,
}

fn default_remote_timeout_ms() -> u64 {
    5_000
}

impl RemoteEndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: default_remote_timeout_ms(),
        }
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Static registration facts for one device family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverDescriptor {
    /// Unique registry key.
    pub name: String,
    pub kind: TransportKind,
    pub version: String,
    #[serde(default)]
    pub capabilities: DriverCapabilities,
    /// Remote endpoint; required for `Remote` and `Hybrid` kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<RemoteEndpointConfig>,
}

impl DriverDescriptor {
    pub fn new(name: impl Into<String>, kind: TransportKind, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            version: version.into(),
            capabilities: DriverCapabilities::default(),
            fallback: None,
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DriverCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, endpoint: RemoteEndpointConfig) -> Self {
        self.fallback = Some(endpoint);
        self
    }

    /// Registration-time validation.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HalError::InvalidDescriptor(
                "descriptor name must not be empty".into(),
            ));
        }
        if self.kind.allows_fallback() && self.fallback.is_none() {
            return Err(HalError::InvalidDescriptor(format!(
                "descriptor '{}' is {} but has no fallback endpoint",
                self.name, self.kind
            )));
        }
        Ok(())
    }
}

/// Which transport served a successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMethod {
    Native,
    Fallback,
}

impl std::fmt::Display for ConnectMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// What a driver reports back from a successful `connect`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAck {
    /// Non-fatal caveat, e.g. "device awaits on-device authorization".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Driver-specific detail for the caller (port, ids, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ConnectAck {
    pub fn ok() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Broker-level connect result: the driver's ack plus the path taken.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOutcome {
    pub method: ConnectMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Payload returned by a driver `read`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPayload {
    /// Raw 16-bit register sequence, one entry per register (Modbus).
    Registers(Vec<u16>),
    /// Raw payload bytes (ADB).
    Bytes(Vec<u8>),
    /// Passthrough JSON from a remote endpoint.
    Json(serde_json::Value),
}

impl ReadPayload {
    pub fn as_registers(&self) -> Option<&[u16]> {
        match self {
            Self::Registers(regs) => Some(regs),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Acknowledgement returned by a driver `write`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAck {
    /// Device echoed the single-register write (Modbus FC 0x06).
    Register { address: u16, value: u16 },
    /// Payload was transmitted (ADB WRTE).
    Sent { bytes: usize },
    /// Passthrough JSON from a remote endpoint.
    Json(serde_json::Value),
}

/// Per-descriptor operation counters kept by the registry.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverStats {
    pub connect_count: u64,
    pub fallback_count: u64,
    pub read_count: u64,
    pub write_count: u64,
    pub error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Public snapshot of one registered descriptor, for observability.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorSnapshot {
    pub name: String,
    pub kind: TransportKind,
    pub version: String,
    pub capabilities: DriverCapabilities,
    pub available: bool,
    pub connected: bool,
    pub using_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub stats: DriverStats,
    pub captured_at: DateTime<Utc>,
}

/// Driver-level diagnostic snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub driver: String,
    pub connection_state: ConnectionState,
    pub read_count: u64,
    pub write_count: u64,
    pub error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Driver-specific extras (port, slave id, authentication flag, ...).
    pub extra: serde_json::Value,
}

/// Typed events pushed to broker subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum HalEvent {
    Registered {
        driver: String,
    },
    AvailabilityChanged {
        driver: String,
        available: bool,
    },
    Connected {
        driver: String,
        method: ConnectMethod,
    },
    /// Native connect failed and the remote fallback took over.
    FallbackEngaged {
        driver: String,
        reason: String,
    },
    Disconnected {
        driver: String,
    },
    OperationFailed {
        driver: String,
        operation: &'static str,
        message: String,
    },
}

pub type HalEventSender = broadcast::Sender<HalEvent>;
pub type HalEventReceiver = broadcast::Receiver<HalEvent>;

/// Push-style event observer, for callers that prefer callbacks over
/// broadcast receivers.
#[async_trait]
pub trait HalEventHandler: Send + Sync {
    async fn on_event(&self, event: &HalEvent);
}

/// The uniform driver contract.
///
/// `detect`, `connect` and `disconnect` are required. `read` and `write`
/// default to [`HalError::UnsupportedOperation`]; drivers that implement
/// them must also set the matching [`DriverCapabilities`] flag on their
/// descriptor so the broker can reject unsupported calls before locking the
/// session.
#[async_trait]
pub trait Driver: Send {
    /// Stable driver name; matches the registry key for built-in drivers.
    fn name(&self) -> &'static str;

    /// Current session state.
    fn connection_state(&self) -> ConnectionState;

    /// Driver-level diagnostic snapshot.
    async fn diagnostics(&self) -> Diagnostics;

    /// Probe whether the device family is reachable. Must not hold
    /// resources on return; failures mean "not available", never panic.
    async fn detect(&mut self) -> Result<bool>;

    /// Open the transport and perform any protocol handshake. `options`
    /// is driver-specific JSON (see each driver's metadata for the schema).
    async fn connect(&mut self, options: &serde_json::Value) -> Result<ConnectAck>;

    /// Tear the session down. Must be idempotent: disconnecting an already
    /// disconnected driver is a no-op.
    async fn disconnect(&mut self) -> Result<()>;

    /// Read from the device. Drivers without read capability keep the
    /// default.
    async fn read(&mut self, params: &serde_json::Value) -> Result<ReadPayload> {
        let _ = params;
        Err(HalError::unsupported(self.name(), "read"))
    }

    /// Write to the device. Drivers without write capability keep the
    /// default.
    async fn write(&mut self, params: &serde_json::Value) -> Result<WriteAck> {
        let _ = params;
        Err(HalError::unsupported(self.name(), "write"))
    }
}

/// A driver session shared between registry and broker.
///
/// The mutex is the per-connection request lock: a second request on the
/// same descriptor blocks until the first resolves instead of racing on the
/// shared transport.
pub type SharedDriver = Arc<Mutex<Box<dyn Driver>>>;

#[cfg(test)]
mod tests {
    use super::*;

    struct DetectOnly;

    #[async_trait]
    impl Driver for DetectOnly {
        fn name(&self) -> &'static str {
            "detect_only"
        }

        fn connection_state(&self) -> ConnectionState {
            ConnectionState::Disconnected
        }

        async fn diagnostics(&self) -> Diagnostics {
            Diagnostics {
                driver: "detect_only".into(),
                connection_state: ConnectionState::Disconnected,
                read_count: 0,
                write_count: 0,
                error_count: 0,
                last_error: None,
                extra: serde_json::Value::Null,
            }
        }

        async fn detect(&mut self) -> Result<bool> {
            Ok(true)
        }

        async fn connect(&mut self, _options: &serde_json::Value) -> Result<ConnectAck> {
            Ok(ConnectAck::ok())
        }

        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn read_write_default_to_unsupported() {
        let mut driver = DetectOnly;
        let err = driver.read(&serde_json::Value::Null).await.unwrap_err();
        assert!(matches!(
            err,
            HalError::UnsupportedOperation { operation: "read", .. }
        ));
        let err = driver.write(&serde_json::Value::Null).await.unwrap_err();
        assert!(matches!(
            err,
            HalError::UnsupportedOperation { operation: "write", .. }
        ));
    }

    #[test]
    fn connection_state_display_and_predicates() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::AwaitingAuth.to_string(), "awaiting_auth");
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::AwaitingAuth.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Error.is_connected());
    }

    #[test]
    fn transport_kind_policy() {
        assert!(TransportKind::Native.allows_native());
        assert!(!TransportKind::Native.allows_fallback());
        assert!(!TransportKind::Remote.allows_native());
        assert!(TransportKind::Remote.allows_fallback());
        assert!(TransportKind::Hybrid.allows_native());
        assert!(TransportKind::Hybrid.allows_fallback());
    }

    #[test]
    fn descriptor_validation() {
        let err = DriverDescriptor::new("", TransportKind::Native, "1.0.0")
            .validate()
            .unwrap_err();
        assert!(matches!(err, HalError::InvalidDescriptor(_)));

        let err = DriverDescriptor::new("meter", TransportKind::Hybrid, "1.0.0")
            .validate()
            .unwrap_err();
        assert!(matches!(err, HalError::InvalidDescriptor(_)));

        DriverDescriptor::new("meter", TransportKind::Hybrid, "1.0.0")
            .with_fallback(RemoteEndpointConfig::new("http://127.0.0.1:9000/hal"))
            .validate()
            .unwrap();

        DriverDescriptor::new("meter", TransportKind::Native, "1.0.0")
            .validate()
            .unwrap();
    }

    #[test]
    fn descriptor_serde_uses_camel_case() {
        let descriptor = DriverDescriptor::new("adb", TransportKind::Native, "1.0.0")
            .with_capabilities(DriverCapabilities::read_write());
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["kind"], "native");
        assert_eq!(json["capabilities"]["read"], true);
    }
}
