//! Serial port transport over tokio-serial.

use serde::{Deserialize, Serialize};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::core::error::{HalError, Result};

/// Parity modes exposed through driver options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    #[default]
    None,
    Even,
    Odd,
}

impl From<SerialParity> for Parity {
    fn from(parity: SerialParity) -> Self {
        match parity {
            SerialParity::None => Parity::None,
            SerialParity::Even => Parity::Even,
            SerialParity::Odd => Parity::Odd,
        }
    }
}

/// Port settings as they arrive in connection options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialSettings {
    pub port: String,
    #[serde(default = "default_baud_rate", alias = "baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits", alias = "data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits", alias = "stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: SerialParity,
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

impl SerialSettings {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: SerialParity::None,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    fn data_bits(&self) -> Result<DataBits> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(HalError::config(format!(
                "unsupported data bits: {other}"
            ))),
        }
    }

    fn stop_bits(&self) -> Result<StopBits> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(HalError::config(format!(
                "unsupported stop bits: {other}"
            ))),
        }
    }

    /// Open the port in async mode with these settings.
    pub fn open(&self) -> Result<SerialStream> {
        let stream = tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(self.data_bits()?)
            .stop_bits(self.stop_bits()?)
            .parity(self.parity.into())
            .open_native_async()?;
        Ok(stream)
    }
}

/// Names of the serial ports visible to the process.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports.into_iter().map(|info| info.port_name).collect())
}
