//! Built-in device drivers.
//!
//! Each driver implements the [`Driver`](crate::core::Driver) contract for
//! one device family: Modbus RTU slaves over serial, Android devices over
//! USB ADB, and a generic remote driver speaking the HTTP fallback
//! contract.

pub mod adb;
pub mod modbus_rtu;
pub mod remote;

pub use adb::AdbDriver;
pub use modbus_rtu::ModbusRtuDriver;
pub use remote::RemoteDriver;

use crate::core::error::HalError;

/// Operation counters behind every driver's diagnostics.
#[derive(Debug, Clone, Default)]
pub(crate) struct OpCounters {
    pub reads: u64,
    pub writes: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}

impl OpCounters {
    pub fn record_read(&mut self) {
        self.reads += 1;
    }

    pub fn record_write(&mut self) {
        self.writes += 1;
    }

    pub fn record_error(&mut self, err: &HalError) {
        self.errors += 1;
        self.last_error = Some(err.to_string());
    }
}
