//! Modbus RTU master driver.
//!
//! Speaks function codes 0x03 (Read Holding Registers) and 0x06 (Write
//! Single Register) to one slave per connection. Every request validates
//! its inputs before touching the wire, waits at most the configured
//! timeout for the response, and rejects CRC or slave-id mismatches
//! instead of interpreting them.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::{timeout, Duration};
use tokio_util::codec::Framed;

use crate::codec::modbus_rtu::{
    parse_read_response, parse_write_echo, read_holding_request, validate_slave_id,
    write_single_request, RtuCodec, RtuFrame,
};
use crate::core::error::{HalError, Result};
use crate::core::logging::{DeviceLogConfig, DeviceLogHandler, LogContext, PacketDirection};
use crate::core::metadata::{DriverMetadata, HasMetadata, ParameterMetadata, ParameterType};
use crate::core::traits::{
    ConnectAck, ConnectMethod, ConnectionState, Diagnostics, Driver, ReadPayload, WriteAck,
};
use crate::transport::serial::SerialParity;
use crate::transport::{list_ports, BoxedByteChannel, SerialSettings};

use super::OpCounters;

/// Registry key of the built-in Modbus RTU driver.
pub const DRIVER_NAME: &str = "modbus_rtu";

const DEFAULT_TIMEOUT_MS: u64 = 1_000;

/// Connect options for [`ModbusRtuDriver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModbusRtuConfig {
    /// Serial port path. Optional only when a channel is injected.
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate", alias = "baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits", alias = "data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits", alias = "stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: SerialParity,
    /// Slave address every request goes to, 1..=247.
    #[serde(alias = "slave_id")]
    pub slave_id: u8,
    /// Response timeout in milliseconds.
    #[serde(default = "default_timeout_ms", rename = "timeout", alias = "timeout_ms")]
    pub timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl ModbusRtuConfig {
    fn parse(options: &Value) -> Result<Self> {
        serde_json::from_value(options.clone())
            .map_err(|err| HalError::config(format!("invalid modbus_rtu options: {err}")))
    }

    fn serial_settings(&self) -> Result<SerialSettings> {
        let port = self
            .port
            .clone()
            .ok_or_else(|| HalError::config("modbus_rtu requires a serial port"))?;
        Ok(SerialSettings {
            port,
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    address: u16,
    quantity: u16,
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    address: u16,
    value: i64,
}

/// Modbus RTU master over a serial line.
pub struct ModbusRtuDriver {
    config: Option<ModbusRtuConfig>,
    channel: Option<Framed<BoxedByteChannel, RtuCodec>>,
    injected: Option<BoxedByteChannel>,
    state: ConnectionState,
    counters: OpCounters,
    log: LogContext,
}

impl ModbusRtuDriver {
    pub fn new() -> Self {
        Self {
            config: None,
            channel: None,
            injected: None,
            state: ConnectionState::Disconnected,
            counters: OpCounters::default(),
            log: LogContext::noop(DRIVER_NAME),
        }
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

    /// Use an already-open byte channel instead of opening a serial port
    /// on connect. For simulated slaves and tests.
    #[must_use]
    pub fn with_channel(mut self, channel: BoxedByteChannel) -> Self {
        self.injected = Some(channel);
        self
    }

    async fn set_state(&mut self, to: ConnectionState) {
        if self.state != to {
            self.log.log_state(self.state, to).await;
            self.state = to;
        }
    }

    /// Send one request and wait for its response.
    ///
    /// The read buffer is cleared first so a response that straggled in
    /// after an earlier timeout is never credited to this request.
    async fn transact(&mut self, request: RtuFrame) -> Result<RtuFrame> {
        let timeout_ms = self
            .config
            .as_ref()
            .map(|config| config.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        let expected_slave = request.slave_id;
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| HalError::NotConnected(DRIVER_NAME.into()))?;
        channel.read_buffer_mut().clear();

        self.log
            .log_frame(PacketDirection::Outbound, &request.encode())
            .await;
        channel.send(request).await?;

        let response = match timeout(Duration::from_millis(timeout_ms), channel.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(err))) => return Err(err),
            Ok(None) => return Err(HalError::transport("serial channel closed")),
            Err(_) => return Err(HalError::RequestTimeout(timeout_ms)),
        };
        self.log
            .log_frame(PacketDirection::Inbound, &response.encode())
            .await;

        if response.slave_id != expected_slave {
            return Err(HalError::frame_corrupt(format!(
                "response from slave {} does not answer request to slave {}",
                response.slave_id, expected_slave
            )));
        }
        Ok(response)
    }
}

impl Default for ModbusRtuDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for ModbusRtuDriver {
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
                "port": self.config.as_ref().and_then(|config| config.port.clone()),
                "slaveId": self.config.as_ref().map(|config| config.slave_id),
                "timeout": self.config.as_ref().map(|config| config.timeout_ms),
            }),
        }
    }

    async fn detect(&mut self) -> Result<bool> {
        if self.injected.is_some() {
            return Ok(true);
        }
        match list_ports() {
            Ok(ports) => Ok(!ports.is_empty()),
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
        let config = ModbusRtuConfig::parse(options)?;
        validate_slave_id(config.slave_id)?;

        self.set_state(ConnectionState::Connecting).await;
        let channel: BoxedByteChannel = match self.injected.take() {
            Some(channel) => channel,
            None => {
                let settings = config.serial_settings()?;
                match settings.open() {
                    Ok(stream) => Box::new(stream),
                    Err(err) => {
                        self.counters.record_error(&err);
                        self.log.log_error("connect", err.to_string()).await;
                        self.set_state(ConnectionState::Error).await;
                        return Err(err);
                    }
                }
            }
        };
        self.channel = Some(Framed::new(channel, RtuCodec));

        let data = json!({
            "port": config.port,
            "baudRate": config.baud_rate,
            "slaveId": config.slave_id,
        });
        self.config = Some(config);
        self.set_state(ConnectionState::Connected).await;
        self.log.log_connected(ConnectMethod::Native).await;
        Ok(ConnectAck::ok().with_data(data))
    }

    async fn disconnect(&mut self) -> Result<()> {
        // Dropping the framed channel closes the port.
        let was_open = self.channel.take().is_some();
        self.config = None;
        self.set_state(ConnectionState::Disconnected).await;
        if was_open {
            self.log.log_disconnected().await;
        }
        Ok(())
    }

    async fn read(&mut self, params: &Value) -> Result<ReadPayload> {
        if !self.state.is_connected() {
            return Err(HalError::NotConnected(DRIVER_NAME.into()));
        }
        let params: ReadParams = serde_json::from_value(params.clone())
            .map_err(|err| HalError::config(format!("invalid read parameters: {err}")))?;
        let slave_id = match &self.config {
            Some(config) => config.slave_id,
            None => return Err(HalError::NotConnected(DRIVER_NAME.into())),
        };
        let request = read_holding_request(slave_id, params.address, params.quantity)?;
        self.log
            .log_request(
                "read",
                format!("address={} quantity={}", params.address, params.quantity),
            )
            .await;

        let result = self.transact(request).await.and_then(|response| {
            parse_read_response(&response, params.quantity).map(ReadPayload::Registers)
        });
        match result {
            Ok(payload) => {
                self.counters.record_read();
                Ok(payload)
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
        let params: WriteParams = serde_json::from_value(params.clone())
            .map_err(|err| HalError::config(format!("invalid write parameters: {err}")))?;
        let value = u16::try_from(params.value).map_err(|_| {
            HalError::InvalidValue(format!(
                "register value {} out of range 0..=65535",
                params.value
            ))
        })?;
        let slave_id = match &self.config {
            Some(config) => config.slave_id,
            None => return Err(HalError::NotConnected(DRIVER_NAME.into())),
        };
        let request = write_single_request(slave_id, params.address, value)?;
        self.log
            .log_request(
                "write",
                format!("address={} value={}", params.address, value),
            )
            .await;

        let result = self
            .transact(request)
            .await
            .and_then(|response| parse_write_echo(&response, params.address, value));
        match result {
            Ok(()) => {
                self.counters.record_write();
                Ok(WriteAck::Register {
                    address: params.address,
                    value,
                })
            }
            Err(err) => {
                self.counters.record_error(&err);
                self.log.log_error("write", err.to_string()).await;
                Err(err)
            }
        }
    }
}

impl HasMetadata for ModbusRtuDriver {
    fn metadata() -> DriverMetadata {
        DriverMetadata {
            name: DRIVER_NAME,
            display_name: "Modbus RTU",
            description: "Modbus RTU master for serial slave devices \
                          (FC 0x03 read, FC 0x06 write)",
            example_options: json!({
                "port": "/dev/ttyUSB0",
                "baudRate": 9600,
                "slaveId": 1,
                "timeout": 1000,
            }),
            parameters: vec![
                ParameterMetadata::required(
                    "port",
                    "Serial Port",
                    "Serial port device path",
                    ParameterType::String,
                ),
                ParameterMetadata::optional(
                    "baudRate",
                    "Baud Rate",
                    "Line speed in bits per second",
                    ParameterType::Integer,
                    json!(9600),
                ),
                ParameterMetadata::optional(
                    "dataBits",
                    "Data Bits",
                    "Data bits per character (5-8)",
                    ParameterType::Integer,
                    json!(8),
                ),
                ParameterMetadata::optional(
                    "stopBits",
                    "Stop Bits",
                    "Stop bits (1 or 2)",
                    ParameterType::Integer,
                    json!(1),
                ),
                ParameterMetadata::optional(
                    "parity",
                    "Parity",
                    "Parity mode: none, even or odd",
                    ParameterType::String,
                    json!("none"),
                ),
                ParameterMetadata::required(
                    "slaveId",
                    "Slave ID",
                    "Modbus slave address (1-247)",
                    ParameterType::Integer,
                ),
                ParameterMetadata::optional(
                    "timeout",
                    "Timeout",
                    "Response timeout in milliseconds",
                    ParameterType::Integer,
                    json!(1000),
                ),
            ],
        }
    }
}
