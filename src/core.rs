//! Core abstractions for the device HAL.
//!
//! This module provides the foundational types and traits that all drivers
//! implement.

pub mod error;
pub mod logging;
pub mod metadata;
pub mod traits;

pub use error::{HalError, Result};
pub use traits::*;
