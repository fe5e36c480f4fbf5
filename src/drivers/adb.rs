//! ADB USB device driver.
//!
//! Connects to an Android device over its ADB USB interface: enumerate,
//! pick a device (explicit ids, then the remembered identity, then the
//! first ADB-capable device), claim the interface and send `CNXN`. A
//! `CNXN` reply means the device trusts this host; an `AUTH` reply means
//! it wants on-screen authorization, in which case the connection is kept
//! in `AwaitingAuth` and read/write fail fast with `NotAuthenticated`
//! rather than attempting an RSA exchange.
//!
//! Successful identities are persisted under [`ADB_IDENTITY_KEY`] so the
//! next connect prefers the same hardware.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::{timeout, Duration};

use crate::codec::adb::{
    command_name, decode_header, AdbMessage, A_AUTH, A_CNXN, HEADER_LEN,
};
use crate::core::error::{HalError, Result};
use crate::core::logging::{DeviceLogConfig, DeviceLogHandler, LogContext, PacketDirection};
use crate::core::metadata::{DriverMetadata, HasMetadata, ParameterMetadata, ParameterType};
use crate::core::traits::{
    ConnectAck, ConnectMethod, ConnectionState, Diagnostics, Driver, ReadPayload, WriteAck,
};
use crate::store::{DeviceIdentity, IdentityStore};
use crate::transport::usb::{UsbBackend, UsbDeviceHandle, UsbDeviceInfo};

use super::OpCounters;

/// Registry key of the built-in ADB driver.
pub const DRIVER_NAME: &str = "adb";

/// Identity-store key the connected device is remembered under.
pub const ADB_IDENTITY_KEY: &str = "adb_device_info";

const DEFAULT_TIMEOUT_MS: u64 = 1_000;

// One host-side shell stream is enough for the command traffic this
// driver carries.
const LOCAL_STREAM_ID: u32 = 1;
const REMOTE_STREAM_ID: u32 = 1;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_banner() -> String {
    "host::".to_owned()
}

fn default_true() -> bool {
    true
}

/// Connect options for [`AdbDriver`]. All fields are optional; an empty
/// object connects to the first ADB-capable device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdbConfig {
    /// Select a specific device by vendor id (with `productId`).
    #[serde(default, alias = "vendor_id")]
    pub vendor_id: Option<u16>,
    #[serde(default, alias = "product_id")]
    pub product_id: Option<u16>,
    /// Response timeout in milliseconds, handshake included.
    #[serde(default = "default_timeout_ms", rename = "timeout", alias = "timeout_ms")]
    pub timeout_ms: u64,
    /// Host banner sent in `CNXN` (NUL appended on the wire).
    #[serde(default = "default_banner")]
    pub banner: String,
    /// Persist the connected device identity for the next connect.
    #[serde(default = "default_true", alias = "remember_device")]
    pub remember_device: bool,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            vendor_id: None,
            product_id: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            banner: default_banner(),
            remember_device: true,
        }
    }
}

impl AdbConfig {
    fn parse(options: &Value) -> Result<Self> {
        if options.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(options.clone())
            .map_err(|err| HalError::config(format!("invalid adb options: {err}")))
    }
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    command: String,
}

/// ADB-over-USB driver for Android devices.
pub struct AdbDriver {
    backend: Arc<dyn UsbBackend>,
    store: Option<Arc<dyn IdentityStore>>,
    device: Option<Box<dyn UsbDeviceHandle>>,
    config: AdbConfig,
    authenticated: bool,
    state: ConnectionState,
    counters: OpCounters,
    log: LogContext,
}

impl AdbDriver {
    pub fn new(backend: Arc<dyn UsbBackend>) -> Self {
        Self {
            backend,
            store: None,
            device: None,
            config: AdbConfig::default(),
            authenticated: false,
            state: ConnectionState::Disconnected,
            counters: OpCounters::default(),
            log: LogContext::noop(DRIVER_NAME),
        }
    }

    /// Remember connected devices through this store.
    #[must_use]
    pub fn with_identity_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_log_handler(
        mut self,
        handler: Arc<dyn DeviceLogHandler>,
        config: DeviceLogConfig,
    ) -> Self {
        self.log = LogContext::new(DRIVER_NAME, handler, config);
        self
    }

    /// True once the device answered `CNXN` with `CNXN`.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn set_state(&mut self, to: ConnectionState) {
        if self.state != to {
            self.log.log_state(self.state, to).await;
            self.state = to;
        }
    }

    /// Pick the device to connect to.
    ///
    /// Explicit vendor/product ids win; otherwise a remembered identity
    /// that is still attached; otherwise the first ADB-capable device.
    async fn select_device(&self, config: &AdbConfig) -> Result<UsbDeviceInfo> {
        let devices = self.backend.devices().await?;
        if devices.is_empty() {
            return Err(HalError::NoAdbInterface("no USB devices attached".into()));
        }
        let adb_capable: Vec<UsbDeviceInfo> = devices
            .into_iter()
            .filter(UsbDeviceInfo::supports_adb)
            .collect();
        if adb_capable.is_empty() {
            return Err(HalError::NoAdbInterface(
                "no attached USB device exposes an ADB interface; \
                 is USB debugging enabled?"
                    .into(),
            ));
        }

        if let (Some(vendor_id), Some(product_id)) = (config.vendor_id, config.product_id) {
            return adb_capable
                .into_iter()
                .find(|device| device.vendor_id == vendor_id && device.product_id == product_id)
                .ok_or_else(|| {
                    HalError::NotFound(format!("usb device {vendor_id:04x}:{product_id:04x}"))
                });
        }

        if let Some(store) = &self.store {
            match store.load(ADB_IDENTITY_KEY).await {
                Ok(Some(identity)) => {
                    if let Some(remembered) = adb_capable
                        .iter()
                        .find(|device| identity.matches(device.vendor_id, device.product_id))
                    {
                        return Ok(remembered.clone());
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    self.log
                        .log_warning("connect", format!("identity store read failed: {err}"))
                        .await;
                }
            }
        }

        adb_capable.into_iter().next().ok_or_else(|| {
            HalError::NoAdbInterface("no attached USB device exposes an ADB interface".into())
        })
    }

    async fn persist_identity(&self, identity: &DeviceIdentity) {
        if !self.config.remember_device {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        if let Err(err) = store.save(ADB_IDENTITY_KEY, identity).await {
            // Persistence is best effort; the session stays up.
            self.log
                .log_warning("connect", format!("identity store write failed: {err}"))
                .await;
        }
    }

    async fn send_message(&mut self, message: &AdbMessage) -> Result<()> {
        let bytes = message.encode();
        self.log
            .log_frame(PacketDirection::Outbound, &bytes)
            .await;
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| HalError::NotConnected(DRIVER_NAME.into()))?;
        device.bulk_out(&bytes).await?;
        Ok(())
    }

    /// Read one complete message: a 24-byte header, then its payload.
    /// Both reads share one timeout window.
    async fn read_message(&mut self) -> Result<AdbMessage> {
        let timeout_ms = self.config.timeout_ms;
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| HalError::NotConnected(DRIVER_NAME.into()))?;

        let message = timeout(Duration::from_millis(timeout_ms), async {
            let header_bytes = device.bulk_in(HEADER_LEN).await?;
            let header = decode_header(&header_bytes)?;
            let payload = if header.has_payload() {
                device.bulk_in(header.data_length as usize).await?
            } else {
                Vec::new()
            };
            AdbMessage::from_parts(header, payload)
        })
        .await
        .map_err(|_| HalError::RequestTimeout(timeout_ms))??;

        self.log
            .log_frame(PacketDirection::Inbound, &message.encode())
            .await;
        Ok(message)
    }

    async fn handshake(&mut self, config: AdbConfig) -> Result<ConnectAck> {
        let info = self.select_device(&config).await?;
        let mut device = self.backend.open(&info).await?;
        device.claim_adb_interface().await?;
        self.device = Some(device);

        let request = AdbMessage::cnxn(&config.banner);
        self.config = config;
        self.send_message(&request).await?;
        let reply = self.read_message().await?;

        match reply.command {
            A_CNXN => {
                self.authenticated = true;
                self.set_state(ConnectionState::Connected).await;
                self.log.log_connected(ConnectMethod::Native).await;
                let identity =
                    DeviceIdentity::new(info.vendor_id, info.product_id, info.product_name.clone());
                self.persist_identity(&identity).await;
                Ok(ConnectAck::ok().with_data(json!({
                    "device": info.label(),
                    "banner": reply.banner(),
                    "authenticated": true,
                })))
            }
            A_AUTH => {
                self.authenticated = false;
                self.set_state(ConnectionState::AwaitingAuth).await;
                let warning =
                    "device requires authorization; confirm the prompt on the device screen";
                self.log.log_warning("connect", warning).await;
                Ok(ConnectAck::ok().with_warning(warning).with_data(json!({
                    "device": info.label(),
                    "authenticated": false,
                })))
            }
            other => Err(HalError::transport(format!(
                "unexpected {} reply to CNXN",
                command_name(other)
            ))),
        }
    }
}

#[async_trait]
impl Driver for AdbDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    async fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            driver: DRIVER_NAME.into(),
            connection_state: self.state,
            read_count: self.counters.reads,
            write_count: self.counters.writes,
            error_count: self.counters.errors,
            last_error: self.counters.last_error.clone(),
            extra: json!({
                "device": self.device.as_ref().map(|device| device.info().label()),
                "authenticated": self.authenticated,
            }),
        }
    }

    async fn detect(&mut self) -> Result<bool> {
        match self.backend.devices().await {
            Ok(devices) => Ok(devices.iter().any(UsbDeviceInfo::supports_adb)),
            Err(err) => {
                self.log.log_error("detect", err.to_string()).await;
                Ok(false)
            }
        }
    }

    async fn connect(&mut self, options: &Value) -> Result<ConnectAck> {
        if self.state.is_connected() {
            return Err(HalError::AlreadyConnected(DRIVER_NAME.into()));
        }
        let config = AdbConfig::parse(options)?;
        self.set_state(ConnectionState::Connecting).await;

        match self.handshake(config).await {
            Ok(ack) => Ok(ack),
            Err(err) => {
                // A half-open handle must not keep the interface claimed.
                if let Some(mut device) = self.device.take() {
                    let _ = device.release().await;
                }
                self.counters.record_error(&err);
                self.log.log_error("connect", err.to_string()).await;
                self.set_state(ConnectionState::Error).await;
                Err(err)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        let Some(mut device) = self.device.take() else {
            self.set_state(ConnectionState::Disconnected).await;
            return Ok(());
        };

        if self.authenticated {
            let close = AdbMessage::clse(LOCAL_STREAM_ID, REMOTE_STREAM_ID);
            let bytes = close.encode();
            self.log.log_frame(PacketDirection::Outbound, &bytes).await;
            if let Err(err) = device.bulk_out(&bytes).await {
                // Best effort; the interface is released either way.
                self.log
                    .log_warning("disconnect", format!("CLSE failed: {err}"))
                    .await;
            }
        }
        if let Err(err) = device.release().await {
            self.log
                .log_warning("disconnect", format!("release failed: {err}"))
                .await;
        }

        self.authenticated = false;
        self.set_state(ConnectionState::Disconnected).await;
        self.log.log_disconnected().await;
        Ok(())
    }

    async fn read(&mut self, _params: &Value) -> Result<ReadPayload> {
        if !self.state.is_connected() {
            return Err(HalError::NotConnected(DRIVER_NAME.into()));
        }
        if !self.authenticated {
            return Err(HalError::NotAuthenticated);
        }
        self.log.log_request("read", "awaiting one message").await;
        match self.read_message().await {
            Ok(message) => {
                self.counters.record_read();
                Ok(ReadPayload::Bytes(message.payload))
            }
            Err(err) => {
                self.counters.record_error(&err);
                self.log.log_error("read", err.to_string()).await;
                Err(err)
            }
        }
    }

    async fn write(&mut self, params: &Value) -> Result<WriteAck> {
        if !self.state.is_connected() {
            return Err(HalError::NotConnected(DRIVER_NAME.into()));
        }
        if !self.authenticated {
            return Err(HalError::NotAuthenticated);
        }
        let params: WriteParams = serde_json::from_value(params.clone())
            .map_err(|err| HalError::config(format!("invalid write parameters: {err}")))?;

        let message = AdbMessage::wrte(
            LOCAL_STREAM_ID,
            REMOTE_STREAM_ID,
            params.command.into_bytes(),
        );
        let sent = message.payload.len();
        self.log
            .log_request("write", format!("WRTE {sent} bytes"))
            .await;
        match self.send_message(&message).await {
            Ok(()) => {
                self.counters.record_write();
                Ok(WriteAck::Sent { bytes: sent })
            }
            Err(err) => {
                self.counters.record_error(&err);
                self.log.log_error("write", err.to_string()).await;
                Err(err)
            }
        }
    }
}

impl HasMetadata for AdbDriver {
    fn metadata() -> DriverMetadata {
        DriverMetadata {
            name: DRIVER_NAME,
            display_name: "Android Debug Bridge",
            description: "ADB over USB for Android devices; no RSA key exchange, \
                          unauthorized devices stay in awaiting_auth",
            example_options: json!({
                "vendorId": 1256,
                "productId": 26720,
                "timeout": 1000,
            }),
            parameters: vec![
                ParameterMetadata::optional(
                    "vendorId",
                    "Vendor ID",
                    "USB vendor id of the device to prefer",
                    ParameterType::Integer,
                    json!(null),
                ),
                ParameterMetadata::optional(
                    "productId",
                    "Product ID",
                    "USB product id of the device to prefer",
                    ParameterType::Integer,
                    json!(null),
                ),
                ParameterMetadata::optional(
                    "timeout",
                    "Timeout",
                    "Response timeout in milliseconds",
                    ParameterType::Integer,
                    json!(1000),
                ),
                ParameterMetadata::optional(
                    "banner",
                    "Banner",
                    "Host banner sent in the CNXN handshake",
                    ParameterType::String,
                    json!("host::"),
                ),
                ParameterMetadata::optional(
                    "rememberDevice",
                    "Remember Device",
                    "Persist the device identity for the next connect",
                    ParameterType::Boolean,
                    json!(true),
                ),
            ],
        }
    }
}
