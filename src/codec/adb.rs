//! ADB USB transport message codec.
//!
//! Every message starts with a 24-byte header of six little-endian `u32`
//! fields: `command`, `arg0`, `arg1`, `data_length`, `data_checksum`,
//! `magic`. The magic is the command XORed with `0xFFFF_FFFF`; the checksum
//! is the wrapping sum of the payload bytes. A header whose magic does not
//! invert its command, or a payload that does not match the declared length
//! and checksum, is rejected as corrupt.
//!
//! `arg0` and `arg1` carry stream and protocol arguments and are not
//! covered by any redundancy.

use crate::core::error::{HalError, Result};

/// Host-to-device connect request / device banner reply.
pub const A_CNXN: u32 = u32::from_le_bytes(*b"CNXN");
/// Device demands RSA authentication.
pub const A_AUTH: u32 = u32::from_le_bytes(*b"AUTH");
/// Stream acknowledgement.
pub const A_OKAY: u32 = u32::from_le_bytes(*b"OKAY");
/// Stream close.
pub const A_CLSE: u32 = u32::from_le_bytes(*b"CLSE");
/// Stream payload write.
pub const A_WRTE: u32 = u32::from_le_bytes(*b"WRTE");

/// Protocol version sent in `CNXN.arg0`.
pub const ADB_VERSION: u32 = 0x0100_0000;
/// Largest payload either side may send, carried in `CNXN.arg1`.
pub const ADB_MAX_PAYLOAD: u32 = 0x0004_0000;
/// Fixed header size on the wire.
pub const HEADER_LEN: usize = 24;

const MAGIC_XOR: u32 = 0xFFFF_FFFF;

/// Printable name for a command word, for logs and errors.
pub fn command_name(command: u32) -> &'static str {
    match command {
        A_CNXN => "CNXN",
        A_AUTH => "AUTH",
        A_OKAY => "OKAY",
        A_CLSE => "CLSE",
        A_WRTE => "WRTE",
        _ => "????",
    }
}

fn is_known_command(command: u32) -> bool {
    matches!(command, A_CNXN | A_AUTH | A_OKAY | A_CLSE | A_WRTE)
}

/// Decoded header fields, before the payload has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdbHeader {
    pub command: u32,
    pub arg0: u32,
    pub arg1: u32,
    pub data_length: u32,
    pub data_checksum: u32,
}

impl AdbHeader {
    /// True when a payload of `data_length` bytes follows this header.
    pub fn has_payload(&self) -> bool {
        self.data_length > 0
    }
}

/// One complete ADB message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbMessage {
    pub command: u32,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Vec<u8>,
}

impl AdbMessage {
    pub fn new(command: u32, arg0: u32, arg1: u32, payload: Vec<u8>) -> Self {
        Self {
            command,
            arg0,
            arg1,
            payload,
        }
    }

    /// Connect request carrying the host banner.
    pub fn cnxn(banner: &str) -> Self {
        let mut payload = banner.as_bytes().to_vec();
        payload.push(0);
        Self::new(A_CNXN, ADB_VERSION, ADB_MAX_PAYLOAD, payload)
    }

    /// Stream write from `local_id` to `remote_id`.
    pub fn wrte(local_id: u32, remote_id: u32, payload: Vec<u8>) -> Self {
        Self::new(A_WRTE, local_id, remote_id, payload)
    }

    /// Stream close from `local_id` to `remote_id`.
    pub fn clse(local_id: u32, remote_id: u32) -> Self {
        Self::new(A_CLSE, local_id, remote_id, Vec::new())
    }

    /// Wrapping byte sum of the payload.
    pub fn checksum(&self) -> u32 {
        self.payload
            .iter()
            .fold(0u32, |sum, &byte| sum.wrapping_add(byte as u32))
    }

    /// Serialize header and payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.command.to_le_bytes());
        out.extend_from_slice(&self.arg0.to_le_bytes());
        out.extend_from_slice(&self.arg1.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.checksum().to_le_bytes());
        out.extend_from_slice(&(self.command ^ MAGIC_XOR).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Reassemble a message from a decoded header and its payload,
    /// verifying the declared length and checksum.
    pub fn from_parts(header: AdbHeader, payload: Vec<u8>) -> Result<Self> {
        if payload.len() as u32 != header.data_length {
            return Err(HalError::frame_corrupt(format!(
                "{} payload is {} bytes, header declares {}",
                command_name(header.command),
                payload.len(),
                header.data_length
            )));
        }
        let message = Self::new(header.command, header.arg0, header.arg1, payload);
        let computed = message.checksum();
        if computed != header.data_checksum {
            return Err(HalError::frame_corrupt(format!(
                "{} payload checksum {:#010x} does not match declared {:#010x}",
                command_name(header.command),
                computed,
                header.data_checksum
            )));
        }
        Ok(message)
    }

    /// Payload interpreted as a NUL-terminated UTF-8 banner.
    pub fn banner(&self) -> String {
        let end = self
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.payload.len());
        String::from_utf8_lossy(&self.payload[..end]).into_owned()
    }
}

/// Parse and validate a 24-byte header.
///
/// Rejects short buffers, magic words that do not invert their command,
/// command words outside the known set, and payload lengths beyond the
/// protocol maximum.
pub fn decode_header(bytes: &[u8]) -> Result<AdbHeader> {
    if bytes.len() != HEADER_LEN {
        return Err(HalError::frame_corrupt(format!(
            "header is {} bytes, expected {}",
            bytes.len(),
            HEADER_LEN
        )));
    }
    let word = |idx: usize| {
        u32::from_le_bytes([
            bytes[idx * 4],
            bytes[idx * 4 + 1],
            bytes[idx * 4 + 2],
            bytes[idx * 4 + 3],
        ])
    };
    let command = word(0);
    let magic = word(5);
    if magic != command ^ MAGIC_XOR {
        return Err(HalError::frame_corrupt(format!(
            "magic {:#010x} does not invert command {:#010x}",
            magic, command
        )));
    }
    if !is_known_command(command) {
        return Err(HalError::frame_corrupt(format!(
            "unknown command word {:#010x}",
            command
        )));
    }
    let data_length = word(3);
    if data_length > ADB_MAX_PAYLOAD {
        return Err(HalError::frame_corrupt(format!(
            "declared payload of {} bytes exceeds maximum {}",
            data_length, ADB_MAX_PAYLOAD
        )));
    }
    Ok(AdbHeader {
        command,
        arg0: word(1),
        arg1: word(2),
        data_length,
        data_checksum: word(4),
    })
}
