//! Error types for the device HAL.
//!
//! Everything in this crate returns [`HalError`] through the crate-wide
//! [`Result`] alias. Validation errors are raised before any I/O is
//! attempted; wire-integrity failures (`CrcMismatch`, `FrameCorrupt`) are
//! never tolerated or auto-corrected; device-reported protocol errors
//! (`ModbusException`) are kept distinct from transport failures.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, HalError>;

/// All failures the HAL can surface.
#[derive(Debug, Error)]
pub enum HalError {
    /// A descriptor failed registration-time validation.
    #[error("invalid driver descriptor: {0}")]
    InvalidDescriptor(String),

    /// No driver registered under the given name.
    #[error("driver '{0}' is not registered")]
    NotFound(String),

    /// Operation requires an established connection.
    #[error("driver '{0}' is not connected")]
    NotConnected(String),

    /// Connect was called while a session is already active.
    #[error("driver '{0}' is already connected")]
    AlreadyConnected(String),

    /// The driver does not implement the requested capability.
    #[error("driver '{driver}' does not support '{operation}'")]
    UnsupportedOperation {
        driver: String,
        operation: &'static str,
    },

    /// No USB interface matching the ADB class triple was found.
    ///
    /// This is the common "USB debugging not enabled" case and is kept
    /// distinct from generic open failures.
    #[error("no ADB interface: {0}")]
    NoAdbInterface(String),

    /// Modbus slave id outside 1..=247.
    #[error("invalid slave id {0} (expected 1..=247)")]
    InvalidSlaveId(u8),

    /// Modbus read quantity outside 1..=125.
    #[error("invalid register quantity {0} (expected 1..=125)")]
    InvalidQuantity(u16),

    /// A write value failed validation.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Frame CRC did not match the computed CRC-16/MODBUS.
    #[error("CRC mismatch: computed {expected:#06x}, frame carries {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Frame failed structural or integrity validation.
    #[error("corrupt frame: {0}")]
    FrameCorrupt(String),

    /// The device answered with a Modbus exception response.
    #[error("modbus exception {0:#04x} ({})", exception_name(*.0))]
    ModbusException(u8),

    /// No response arrived within the configured window.
    #[error("request timed out after {0} ms")]
    RequestTimeout(u64),

    /// ADB handshake did not complete; the device awaits on-device
    /// authorization.
    #[error("ADB device is not authenticated; confirm the authorization prompt on the device")]
    NotAuthenticated,

    /// Native and remote connect attempts both failed (hybrid descriptors).
    #[error("native transport failed ({native}); remote fallback failed ({remote})")]
    FallbackFailed {
        native: Box<HalError>,
        remote: Box<HalError>,
    },

    /// Transport-level failure (open, claim, transfer, endpoint status).
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HalError {
    /// Configuration error with a formatted message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Transport error with a formatted message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Corrupt-frame error with a formatted message.
    pub fn frame_corrupt(message: impl Into<String>) -> Self {
        Self::FrameCorrupt(message.into())
    }

    /// Capability-not-implemented error.
    pub fn unsupported(driver: impl Into<String>, operation: &'static str) -> Self {
        Self::UnsupportedOperation {
            driver: driver.into(),
            operation,
        }
    }

    /// True for wire-integrity failures that must discard the frame.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::CrcMismatch { .. } | Self::FrameCorrupt(_))
    }

    /// True when the error is a pre-I/O input validation failure.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidSlaveId(_)
                | Self::InvalidQuantity(_)
                | Self::InvalidValue(_)
                | Self::InvalidDescriptor(_)
        )
    }
}

/// Human-readable names for the standard Modbus exception codes.
fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "server device failure",
        0x05 => "acknowledge",
        0x06 => "server device busy",
        0x08 => "memory parity error",
        0x0A => "gateway path unavailable",
        0x0B => "gateway target failed to respond",
        _ => "unknown exception",
    }
}
