//! Binary frame codecs.
//!
//! Pure builders, parsers and validators for the two wire formats this
//! crate speaks. Nothing in here performs I/O; drivers feed bytes in and
//! get frames or errors out.

pub mod adb;
pub mod modbus_rtu;
