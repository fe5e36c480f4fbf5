//! Transport backends carrying frames between drivers and devices.
//!
//! Serial and USB transports move raw bytes for the native protocol
//! paths; the HTTP transport speaks the remote fallback contract. The
//! mock transport scripts deterministic peers for tests.

pub mod http;
pub mod mock;
pub mod serial;
pub mod usb;

use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream a frame codec can run over.
///
/// Serial ports, duplex test pipes and anything else async-readable and
/// async-writable qualify via the blanket impl.
pub trait ByteChannel: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Sync + Unpin> ByteChannel for T {}

/// Owned, type-erased byte channel.
pub type BoxedByteChannel = Box<dyn ByteChannel>;

pub use http::RemoteEndpoint;
pub use serial::{list_ports, SerialParity, SerialSettings};
pub use usb::{UsbBackend, UsbDeviceHandle, UsbDeviceInfo, UsbInterfaceClass, ADB_INTERFACE};
