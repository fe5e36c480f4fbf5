//! Session logging infrastructure.
//!
//! Drivers report their lifecycle and wire traffic through a
//! [`DeviceLogHandler`] instead of calling a logging framework directly.
//! The handler is pluggable: [`NoopLogHandler`] for silence,
//! [`PrintLogHandler`] for quick debugging, [`CompositeLogHandler`] for
//! fan-out, and [`TracingLogHandler`] (behind the `tracing-support` feature)
//! for structured logs. [`LogContext`] bundles the handler with a device
//! name and per-session config so driver code stays terse.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::traits::{ConnectMethod, ConnectionState};

/// Direction of a raw frame on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Outbound,
    Inbound,
}

impl std::fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outbound => write!(f, ">>>"),
            Self::Inbound => write!(f, "<<<"),
        }
    }
}

/// One loggable driver event.
#[derive(Debug, Clone)]
pub enum DeviceLogEvent {
    Connected {
        method: ConnectMethod,
    },
    Disconnected,
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Request {
        operation: &'static str,
        detail: String,
    },
    RawFrame {
        direction: PacketDirection,
        bytes: Vec<u8>,
    },
    /// Non-fatal condition the caller should know about, e.g. an ADB
    /// device waiting for on-screen authorization.
    Warning {
        operation: &'static str,
        message: String,
    },
    Error {
        operation: &'static str,
        message: String,
    },
}

/// Per-session logging configuration.
#[derive(Debug, Clone)]
pub struct DeviceLogConfig {
    /// Emit `RawFrame` events. Off by default; frame dumps are noisy.
    pub log_raw_frames: bool,
    /// Truncate frame dumps beyond this many bytes.
    pub max_frame_bytes: usize,
}

impl Default for DeviceLogConfig {
    fn default() -> Self {
        Self {
            log_raw_frames: false,
            max_frame_bytes: 64,
        }
    }
}

impl DeviceLogConfig {
    #[must_use]
    pub fn with_raw_frames(mut self, enabled: bool) -> Self {
        self.log_raw_frames = enabled;
        self
    }

    #[must_use]
    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }
}

/// Receiver for driver log events.
#[async_trait]
pub trait DeviceLogHandler: Send + Sync {
    async fn on_log(&self, device: &str, event: &DeviceLogEvent);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopLogHandler;

#[async_trait]
impl DeviceLogHandler for NoopLogHandler {
    async fn on_log(&self, _device: &str, _event: &DeviceLogEvent) {}
}

/// Prints to stdout. Intended for examples and manual debugging.
#[derive(Debug, Default)]
pub struct PrintLogHandler;

#[async_trait]
impl DeviceLogHandler for PrintLogHandler {
    async fn on_log(&self, device: &str, event: &DeviceLogEvent) {
        match event {
            DeviceLogEvent::Connected { method } => {
                println!("[{device}] connected via {method}");
            }
            DeviceLogEvent::Disconnected => {
                println!("[{device}] disconnected");
            }
            DeviceLogEvent::StateChanged { from, to } => {
                println!("[{device}] state {from} -> {to}");
            }
            DeviceLogEvent::Request { operation, detail } => {
                println!("[{device}] {operation}: {detail}");
            }
            DeviceLogEvent::RawFrame { direction, bytes } => {
                println!("[{device}] {direction} {}", format_frame(bytes, usize::MAX));
            }
            DeviceLogEvent::Warning { operation, message } => {
                println!("[{device}] {operation} warning: {message}");
            }
            DeviceLogEvent::Error { operation, message } => {
                println!("[{device}] {operation} failed: {message}");
            }
        }
    }
}

/// Fans one event out to several handlers.
#[derive(Default)]
pub struct CompositeLogHandler {
    handlers: Vec<Arc<dyn DeviceLogHandler>>,
}

impl CompositeLogHandler {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn DeviceLogHandler>) -> Self {
        self.handlers.push(handler);
        self
    }
}

#[async_trait]
impl DeviceLogHandler for CompositeLogHandler {
    async fn on_log(&self, device: &str, event: &DeviceLogEvent) {
        for handler in &self.handlers {
            handler.on_log(device, event).await;
        }
    }
}

/// Routes events into the `tracing` ecosystem.
#[cfg(feature = "tracing-support")]
#[derive(Debug, Default)]
pub struct TracingLogHandler;

#[cfg(feature = "tracing-support")]
#[async_trait]
impl DeviceLogHandler for TracingLogHandler {
    async fn on_log(&self, device: &str, event: &DeviceLogEvent) {
        match event {
            DeviceLogEvent::Connected { method } => {
                tracing::info!(device, method = %method, "device connected");
            }
            DeviceLogEvent::Disconnected => {
                tracing::info!(device, "device disconnected");
            }
            DeviceLogEvent::StateChanged { from, to } => {
                tracing::debug!(device, from = %from, to = %to, "connection state changed");
            }
            DeviceLogEvent::Request { operation, detail } => {
                tracing::debug!(device, operation, detail = %detail, "request");
            }
            DeviceLogEvent::RawFrame { direction, bytes } => {
                tracing::trace!(
                    device,
                    direction = %direction,
                    len = bytes.len(),
                    frame = %format_frame(bytes, 64),
                    "raw frame"
                );
            }
            DeviceLogEvent::Warning { operation, message } => {
                tracing::warn!(device, operation, %message, "warning");
            }
            DeviceLogEvent::Error { operation, message } => {
                tracing::warn!(device, operation, error = %message, "operation failed");
            }
        }
    }
}

/// Handler plus device name plus config, carried by each driver.
#[derive(Clone)]
pub struct LogContext {
    device: String,
    handler: Arc<dyn DeviceLogHandler>,
    config: DeviceLogConfig,
}

impl LogContext {
    pub fn new(
        device: impl Into<String>,
        handler: Arc<dyn DeviceLogHandler>,
        config: DeviceLogConfig,
    ) -> Self {
        Self {
            device: device.into(),
            handler,
            config,
        }
    }

    /// A context that drops every event.
    pub fn noop(device: impl Into<String>) -> Self {
        Self::new(device, Arc::new(NoopLogHandler), DeviceLogConfig::default())
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub async fn log_connected(&self, method: ConnectMethod) {
        self.emit(DeviceLogEvent::Connected { method }).await;
    }

    pub async fn log_disconnected(&self) {
        self.emit(DeviceLogEvent::Disconnected).await;
    }

    pub async fn log_state(&self, from: ConnectionState, to: ConnectionState) {
        self.emit(DeviceLogEvent::StateChanged { from, to }).await;
    }

    pub async fn log_request(&self, operation: &'static str, detail: impl Into<String>) {
        self.emit(DeviceLogEvent::Request {
            operation,
            detail: detail.into(),
        })
        .await;
    }

    pub async fn log_warning(&self, operation: &'static str, message: impl Into<String>) {
        self.emit(DeviceLogEvent::Warning {
            operation,
            message: message.into(),
        })
        .await;
    }

    pub async fn log_error(&self, operation: &'static str, message: impl Into<String>) {
        self.emit(DeviceLogEvent::Error {
            operation,
            message: message.into(),
        })
        .await;
    }

    /// Logs a frame dump when enabled, truncated per config.
    pub async fn log_frame(&self, direction: PacketDirection, bytes: &[u8]) {
        if !self.config.log_raw_frames {
            return;
        }
        let capped: Vec<u8> = bytes
            .iter()
            .copied()
            .take(self.config.max_frame_bytes)
            .collect();
        self.emit(DeviceLogEvent::RawFrame {
            direction,
            bytes: capped,
        })
        .await;
    }

    async fn emit(&self, event: DeviceLogEvent) {
        self.handler.on_log(&self.device, &event).await;
    }
}

impl std::fmt::Debug for LogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogContext")
            .field("device", &self.device)
            .field("config", &self.config)
            .finish()
    }
}

/// Hex dump helper: `01 03 00 0A ..` with an ellipsis past `max` bytes.
pub fn format_frame(bytes: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(bytes.len().min(max) * 3 + 4);
    for (i, byte) in bytes.iter().take(max).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    if bytes.len() > max {
        out.push_str(" ..");
    }
    out
}
