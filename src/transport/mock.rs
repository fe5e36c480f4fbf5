//! Scripted transport peers for exercising drivers without hardware.
//!
//! [`MockSlave`] plays the serial side of a request/response protocol:
//! each scripted step consumes one incoming request and either answers
//! with fixed bytes or stays silent. [`MockUsbBackend`] enumerates
//! in-memory devices whose bulk endpoints replay queued messages.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Mutex;

use crate::codec::adb::{AdbMessage, HEADER_LEN};
use crate::core::error::{HalError, Result};

use super::usb::{UsbBackend, UsbDeviceHandle, UsbDeviceInfo, ADB_INTERFACE};
use super::BoxedByteChannel;

/// In-memory byte channel pair: the boxed half goes to a driver, the
/// raw half stays with the test.
pub fn duplex_channel() -> (BoxedByteChannel, DuplexStream) {
    let (client, server) = tokio::io::duplex(4096);
    (Box::new(client), server)
}

/// Device info advertising the ADB interface class.
pub fn adb_device_info(vendor_id: u16, product_id: u16, name: &str) -> UsbDeviceInfo {
    UsbDeviceInfo {
        vendor_id,
        product_id,
        product_name: Some(name.to_owned()),
        interfaces: vec![ADB_INTERFACE],
    }
}

/// Device info with no ADB interface.
pub fn plain_device_info(vendor_id: u16, product_id: u16) -> UsbDeviceInfo {
    UsbDeviceInfo {
        vendor_id,
        product_id,
        product_name: None,
        interfaces: Vec::new(),
    }
}

enum SlaveAction {
    Reply(Vec<u8>),
    Silence,
}

/// Scripted request/response peer for serial-style drivers.
#[derive(Default)]
pub struct MockSlave {
    script: Vec<SlaveAction>,
}

impl MockSlave {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next request with exactly these bytes.
    pub fn reply(mut self, bytes: Vec<u8>) -> Self {
        self.script.push(SlaveAction::Reply(bytes));
        self
    }

    /// Swallow the next request without answering.
    pub fn silence(mut self) -> Self {
        self.script.push(SlaveAction::Silence);
        self
    }

    /// Start the peer task and hand back the driver-side channel.
    pub fn spawn(self) -> BoxedByteChannel {
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            for action in self.script {
                match server.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
                if let SlaveAction::Reply(bytes) = action {
                    if server.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
            }
            // Keep the port open so an exhausted script looks like a
            // silent peer, not a closed channel.
            std::future::pending::<()>().await;
        });
        Box::new(client)
    }
}

/// One queued answer from a mock USB device.
pub enum MockUsbReply {
    /// A well-formed message, served as header then payload.
    Message(AdbMessage),
    /// Arbitrary bytes served in one read, for corruption scenarios.
    Raw(Vec<u8>),
    /// Never answer; reads block until the caller times out.
    Silence,
}

/// Shared state of one mock device, kept by the test for inspection.
#[derive(Default)]
pub struct MockUsbState {
    replies: Mutex<VecDeque<MockUsbReply>>,
    pending_payload: Mutex<Option<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    released: AtomicBool,
    fail_next_out: AtomicBool,
}

impl MockUsbState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn queue_reply(&self, message: AdbMessage) {
        self.replies
            .lock()
            .await
            .push_back(MockUsbReply::Message(message));
    }

    pub async fn queue_raw(&self, bytes: Vec<u8>) {
        self.replies.lock().await.push_back(MockUsbReply::Raw(bytes));
    }

    pub async fn queue_silence(&self) {
        self.replies.lock().await.push_back(MockUsbReply::Silence);
    }

    /// Make the next `bulk_out` fail with a transport error.
    pub fn fail_next_write(&self) {
        self.fail_next_out.store(true, Ordering::SeqCst);
    }

    /// Every frame the driver has written, oldest first.
    pub async fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().await.clone()
    }

    pub fn was_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Backend whose device list and handles are fully scripted.
#[derive(Default)]
pub struct MockUsbBackend {
    devices: Vec<(UsbDeviceInfo, Arc<MockUsbState>)>,
}

impl MockUsbBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, info: UsbDeviceInfo, state: Arc<MockUsbState>) -> Self {
        self.devices.push((info, state));
        self
    }
}

#[async_trait]
impl UsbBackend for MockUsbBackend {
    async fn devices(&self) -> Result<Vec<UsbDeviceInfo>> {
        Ok(self.devices.iter().map(|(info, _)| info.clone()).collect())
    }

    async fn open(&self, info: &UsbDeviceInfo) -> Result<Box<dyn UsbDeviceHandle>> {
        let (found, state) = self
            .devices
            .iter()
            .find(|(candidate, _)| {
                candidate.vendor_id == info.vendor_id && candidate.product_id == info.product_id
            })
            .ok_or_else(|| HalError::NotFound(format!("usb device {}", info.label())))?;
        Ok(Box::new(MockUsbDevice {
            info: found.clone(),
            state: Arc::clone(state),
        }))
    }
}

struct MockUsbDevice {
    info: UsbDeviceInfo,
    state: Arc<MockUsbState>,
}

#[async_trait]
impl UsbDeviceHandle for MockUsbDevice {
    fn info(&self) -> &UsbDeviceInfo {
        &self.info
    }

    async fn claim_adb_interface(&mut self) -> Result<()> {
        if !self.info.supports_adb() {
            return Err(HalError::NoAdbInterface(format!(
                "device {} has no ADB interface",
                self.info.label()
            )));
        }
        Ok(())
    }

    async fn bulk_out(&mut self, bytes: &[u8]) -> Result<usize> {
        if self.state.fail_next_out.swap(false, Ordering::SeqCst) {
            return Err(HalError::transport("bulk write rejected by device"));
        }
        self.state.sent.lock().await.push(bytes.to_vec());
        Ok(bytes.len())
    }

    async fn bulk_in(&mut self, _max_len: usize) -> Result<Vec<u8>> {
        if let Some(payload) = self.state.pending_payload.lock().await.take() {
            return Ok(payload);
        }
        let next = self.state.replies.lock().await.pop_front();
        match next {
            Some(MockUsbReply::Message(message)) => {
                let bytes = message.encode();
                let (header, payload) = bytes.split_at(HEADER_LEN);
                if !payload.is_empty() {
                    *self.state.pending_payload.lock().await = Some(payload.to_vec());
                }
                Ok(header.to_vec())
            }
            Some(MockUsbReply::Raw(bytes)) => Ok(bytes),
            Some(MockUsbReply::Silence) | None => std::future::pending().await,
        }
    }

    async fn release(&mut self) -> Result<()> {
        self.state.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::adb::{decode_header, A_OKAY};
    use std::time::Duration;

    #[tokio::test]
    async fn slave_replies_then_goes_silent() {
        let mut channel = MockSlave::new().reply(vec![0xAA, 0xBB]).spawn();

        channel.write_all(&[0x01]).await.unwrap();
        let mut buf = [0u8; 2];
        channel.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0xAA, 0xBB]);

        channel.write_all(&[0x02]).await.unwrap();
        let read = tokio::time::timeout(Duration::from_millis(20), channel.read(&mut buf)).await;
        assert!(read.is_err(), "exhausted script must not answer or close");
    }

    #[tokio::test]
    async fn usb_message_reply_splits_header_and_payload() {
        let state = MockUsbState::new();
        state
            .queue_reply(AdbMessage::new(A_OKAY, 1, 1, vec![0x10, 0x20]))
            .await;
        let backend = MockUsbBackend::new().with_device(adb_device_info(1, 2, "dev"), state);

        let info = backend.devices().await.unwrap().remove(0);
        let mut handle = backend.open(&info).await.unwrap();

        let header_bytes = handle.bulk_in(HEADER_LEN).await.unwrap();
        let header = decode_header(&header_bytes).unwrap();
        assert_eq!(header.command, A_OKAY);
        assert_eq!(header.data_length, 2);

        let payload = handle.bulk_in(header.data_length as usize).await.unwrap();
        assert_eq!(payload, vec![0x10, 0x20]);
    }

    #[tokio::test]
    async fn usb_silence_blocks_until_timeout() {
        let state = MockUsbState::new();
        state.queue_silence().await;
        let backend =
            MockUsbBackend::new().with_device(adb_device_info(1, 2, "dev"), Arc::clone(&state));

        let info = backend.devices().await.unwrap().remove(0);
        let mut handle = backend.open(&info).await.unwrap();
        let read = tokio::time::timeout(Duration::from_millis(20), handle.bulk_in(24)).await;
        assert!(read.is_err());
    }

    #[tokio::test]
    async fn claim_rejects_devices_without_adb() {
        let state = MockUsbState::new();
        let backend =
            MockUsbBackend::new().with_device(plain_device_info(0x1234, 0x5678), state);
        let info = backend.devices().await.unwrap().remove(0);
        let mut handle = backend.open(&info).await.unwrap();
        let err = handle.claim_adb_interface().await.unwrap_err();
        assert!(matches!(err, HalError::NoAdbInterface(_)));
    }
}
