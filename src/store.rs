//! Device identity persistence.
//!
//! Drivers that remember which hardware they last spoke to keep that
//! identity behind the [`IdentityStore`] trait, with in-memory and
//! JSON-file backends provided.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileIdentityStore;
pub use memory::MemoryIdentityStore;
pub use traits::{DeviceIdentity, IdentityStore};
