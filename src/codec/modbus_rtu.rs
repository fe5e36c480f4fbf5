//! Modbus RTU frame codec.
//!
//! Frame layout: `[slave_id, function, data..., crc_lo, crc_hi]`. The CRC is
//! CRC-16/MODBUS (reflected polynomial 0xA001, initial value 0xFFFF) over
//! every byte except the two trailing CRC bytes, transmitted little-endian.
//! A frame with a mismatching CRC is invalid and is rejected, never
//! interpreted.
//!
//! Only the client side of function codes 0x03 (Read Holding Registers) and
//! 0x06 (Write Single Register) is implemented; exception responses
//! (`function | 0x80`) are recognized for every function code.

use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::error::{HalError, Result};

/// Read Holding Registers.
pub const FC_READ_HOLDING: u8 = 0x03;
/// Write Single Register.
pub const FC_WRITE_SINGLE: u8 = 0x06;
/// High bit marking an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Valid slave address range for addressed requests.
pub const SLAVE_ID_RANGE: std::ops::RangeInclusive<u8> = 1..=247;
/// Register-count limit for FC 0x03, per the protocol's PDU size bound.
pub const MAX_READ_QUANTITY: u16 = 125;

/// Smallest parseable frame: slave + function + 1 data byte + CRC.
const MIN_FRAME_LEN: usize = 5;

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-16/MODBUS over `bytes`.
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC_MODBUS.checksum(bytes)
}

/// Validate a slave address against the addressable range.
pub fn validate_slave_id(slave_id: u8) -> Result<u8> {
    if SLAVE_ID_RANGE.contains(&slave_id) {
        Ok(slave_id)
    } else {
        Err(HalError::InvalidSlaveId(slave_id))
    }
}

/// One RTU frame with the CRC stripped after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuFrame {
    pub slave_id: u8,
    pub function: u8,
    pub data: Vec<u8>,
}

impl RtuFrame {
    pub fn new(slave_id: u8, function: u8, data: Vec<u8>) -> Self {
        Self {
            slave_id,
            function,
            data,
        }
    }

    /// Total on-wire length including CRC.
    pub fn encoded_len(&self) -> usize {
        2 + self.data.len() + 2
    }

    /// Serialize with the trailing little-endian CRC.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.slave_id);
        out.push(self.function);
        out.extend_from_slice(&self.data);
        let crc = crc16(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Parse and CRC-check a complete frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(HalError::frame_corrupt(format!(
                "frame too short: {} bytes",
                bytes.len()
            )));
        }
        let body = &bytes[..bytes.len() - 2];
        let expected = crc16(body);
        let actual = u16::from_le_bytes([bytes[bytes.len() - 2], bytes[bytes.len() - 1]]);
        if expected != actual {
            return Err(HalError::CrcMismatch { expected, actual });
        }
        Ok(Self {
            slave_id: body[0],
            function: body[1],
            data: body[2..].to_vec(),
        })
    }

    /// True when the function byte carries the exception flag.
    pub fn is_exception(&self) -> bool {
        self.function & EXCEPTION_FLAG != 0
    }

    /// Exception code, when this is an exception response.
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.data.first().copied()
        } else {
            None
        }
    }
}

/// Build an FC 0x03 request. Validates the slave id and the 1..=125
/// quantity bound before anything touches the wire.
pub fn read_holding_request(slave_id: u8, address: u16, quantity: u16) -> Result<RtuFrame> {
    validate_slave_id(slave_id)?;
    if quantity == 0 || quantity > MAX_READ_QUANTITY {
        return Err(HalError::InvalidQuantity(quantity));
    }
    let mut data = Vec::with_capacity(4);
    data.extend_from_slice(&address.to_be_bytes());
    data.extend_from_slice(&quantity.to_be_bytes());
    Ok(RtuFrame::new(slave_id, FC_READ_HOLDING, data))
}

/// Build an FC 0x06 request.
pub fn write_single_request(slave_id: u8, address: u16, value: u16) -> Result<RtuFrame> {
    validate_slave_id(slave_id)?;
    let mut data = Vec::with_capacity(4);
    data.extend_from_slice(&address.to_be_bytes());
    data.extend_from_slice(&value.to_be_bytes());
    Ok(RtuFrame::new(slave_id, FC_WRITE_SINGLE, data))
}

/// Decode an FC 0x03 response into the raw register sequence.
///
/// Registers come back big-endian, two bytes each, and are returned one
/// `u16` per register (`[0x00, 0x01, 0x00, 0x02]` decodes to `[1, 2]`).
/// Combining registers into wider values is the caller's concern.
pub fn parse_read_response(frame: &RtuFrame, expected_quantity: u16) -> Result<Vec<u16>> {
    if let Some(code) = frame.exception_code() {
        return Err(HalError::ModbusException(code));
    }
    if frame.function != FC_READ_HOLDING {
        return Err(HalError::frame_corrupt(format!(
            "unexpected function {:#04x} in read response",
            frame.function
        )));
    }
    let byte_count = *frame
        .data
        .first()
        .ok_or_else(|| HalError::frame_corrupt("read response carries no byte count"))?
        as usize;
    let registers = &frame.data[1..];
    if byte_count != registers.len() || byte_count != expected_quantity as usize * 2 {
        return Err(HalError::frame_corrupt(format!(
            "byte count {} does not match {} registers",
            byte_count, expected_quantity
        )));
    }
    Ok(registers
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Validate an FC 0x06 echo response against the request it answers.
///
/// A CRC-valid, non-exception response that does not echo the request
/// address and value is treated as corrupt: the frame is well-formed but
/// cannot be trusted.
pub fn parse_write_echo(frame: &RtuFrame, address: u16, value: u16) -> Result<()> {
    if let Some(code) = frame.exception_code() {
        return Err(HalError::ModbusException(code));
    }
    if frame.function != FC_WRITE_SINGLE {
        return Err(HalError::frame_corrupt(format!(
            "unexpected function {:#04x} in write response",
            frame.function
        )));
    }
    let mut expected = Vec::with_capacity(4);
    expected.extend_from_slice(&address.to_be_bytes());
    expected.extend_from_slice(&value.to_be_bytes());
    if frame.data != expected {
        return Err(HalError::frame_corrupt(
            "write response does not echo the request",
        ));
    }
    Ok(())
}

/// Expected total length of the response frame starting in `buf`, once
/// enough of it has arrived to tell. `None` means more bytes are needed.
///
/// Responses are length-framed by their function code: exceptions are
/// always 5 bytes; FC 0x03 declares its payload in the byte-count field;
/// FC 0x06 echoes the fixed-size request.
pub fn expected_response_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    let function = buf[1];
    if function & EXCEPTION_FLAG != 0 {
        return Some(5);
    }
    match function {
        FC_READ_HOLDING => {
            // slave + function + count + payload + crc
            buf.get(2).map(|&count| 3 + count as usize + 2)
        }
        FC_WRITE_SINGLE => Some(8),
        // Unknown function: take the minimal frame and let CRC validation
        // reject it.
        _ => Some(MIN_FRAME_LEN),
    }
}

/// Frame codec for running RTU over any byte channel.
///
/// The decoder accumulates bytes until the declared response length is
/// complete, then CRC-checks the frame; integrity failures surface as
/// errors, not as frames.
#[derive(Debug, Default)]
pub struct RtuCodec;

impl Decoder for RtuCodec {
    type Item = RtuFrame;
    type Error = HalError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RtuFrame>> {
        let Some(needed) = expected_response_len(src) else {
            return Ok(None);
        };
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }
        let bytes = src.split_to(needed);
        RtuFrame::decode(&bytes).map(Some)
    }
}

impl Encoder<RtuFrame> for RtuCodec {
    type Error = HalError;

    fn encode(&mut self, frame: RtuFrame, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(frame.encoded_len());
        let start = dst.len();
        dst.put_u8(frame.slave_id);
        dst.put_u8(frame.function);
        dst.put_slice(&frame.data);
        let crc = crc16(&dst[start..]);
        dst.put_u16_le(crc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(&[0x01, 0x03, 0x00, 0x01, 0x00, 0x02], 0xCB95 ; "read request")]
    #[test_case(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x03], 0x0B98 ; "write request")]
    #[test_case(&[0x01, 0x83, 0x02], 0xF1C0 ; "exception response")]
    fn crc16_reference_vectors(bytes: &[u8], expected: u16) {
        assert_eq!(crc16(bytes), expected);
    }

    #[test]
    fn encode_appends_crc_little_endian() {
        let frame = read_holding_request(1, 1, 2).unwrap();
        assert_eq!(
            frame.encode(),
            vec![0x01, 0x03, 0x00, 0x01, 0x00, 0x02, 0x95, 0xCB]
        );
    }

    #[test]
    fn decode_valid_response() {
        // Known-good FC 0x03 response: one register, value 100.
        let bytes = [0x01, 0x03, 0x02, 0x00, 0x64, 0xB9, 0xAF];
        let frame = RtuFrame::decode(&bytes).unwrap();
        assert_eq!(frame.slave_id, 1);
        assert_eq!(frame.function, 0x03);
        assert_eq!(frame.data, vec![0x02, 0x00, 0x64]);
        assert!(!frame.is_exception());
    }

    #[test]
    fn decode_rejects_crc_mismatch() {
        let mut bytes = [0x01, 0x03, 0x02, 0x00, 0x64, 0xB9, 0xAF];
        bytes[4] ^= 0x01;
        let err = RtuFrame::decode(&bytes).unwrap_err();
        assert!(matches!(err, HalError::CrcMismatch { .. }));
    }

    #[test]
    fn single_bit_flips_never_pass_crc() {
        let bytes = read_holding_request(5, 0x0010, 3).unwrap().encode();
        for byte_idx in 0..bytes.len() {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[byte_idx] ^= 1 << bit;
                assert!(
                    RtuFrame::decode(&corrupted).is_err(),
                    "flip at byte {byte_idx} bit {bit} slipped through"
                );
            }
        }
    }

    #[test]
    fn round_trip_preserves_frame() {
        let frame = write_single_request(17, 0x00AB, 0x1234).unwrap();
        let decoded = RtuFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn exception_code_extraction() {
        let bytes = [0x01, 0x83, 0x02, 0xC0, 0xF1];
        let frame = RtuFrame::decode(&bytes).unwrap();
        assert!(frame.is_exception());
        assert_eq!(frame.exception_code(), Some(0x02));

        let err = parse_read_response(&frame, 1).unwrap_err();
        assert!(matches!(err, HalError::ModbusException(0x02)));
    }

    #[test]
    fn parse_read_response_registers_pairwise() {
        let frame = RtuFrame::new(5, 0x03, vec![0x04, 0x00, 0x01, 0x00, 0x02]);
        let registers = parse_read_response(&frame, 2).unwrap();
        assert_eq!(registers, vec![1, 2]);
    }

    #[test]
    fn parse_read_response_rejects_bad_byte_count() {
        let frame = RtuFrame::new(5, 0x03, vec![0x04, 0x00, 0x01]);
        assert!(parse_read_response(&frame, 2).is_err());

        let frame = RtuFrame::new(5, 0x03, vec![0x02, 0x00, 0x01]);
        assert!(parse_read_response(&frame, 2).is_err());
    }

    #[test]
    fn write_echo_validation() {
        let frame = RtuFrame::new(1, 0x06, vec![0x00, 0x01, 0x00, 0x03]);
        parse_write_echo(&frame, 1, 3).unwrap();

        let err = parse_write_echo(&frame, 1, 4).unwrap_err();
        assert!(matches!(err, HalError::FrameCorrupt(_)));
    }

    #[test]
    fn request_validation_happens_before_io() {
        assert!(matches!(
            read_holding_request(0, 0, 1).unwrap_err(),
            HalError::InvalidSlaveId(0)
        ));
        assert!(matches!(
            read_holding_request(248, 0, 1).unwrap_err(),
            HalError::InvalidSlaveId(248)
        ));
        assert!(matches!(
            read_holding_request(1, 0, 0).unwrap_err(),
            HalError::InvalidQuantity(0)
        ));
        assert!(matches!(
            read_holding_request(1, 0, 126).unwrap_err(),
            HalError::InvalidQuantity(126)
        ));
        read_holding_request(1, 0, 125).unwrap();
    }

    #[test]
    fn expected_len_by_function() {
        assert_eq!(expected_response_len(&[0x01]), None);
        assert_eq!(expected_response_len(&[0x01, 0x83]), Some(5));
        assert_eq!(expected_response_len(&[0x01, 0x03]), None);
        assert_eq!(expected_response_len(&[0x01, 0x03, 0x04]), Some(9));
        assert_eq!(expected_response_len(&[0x01, 0x06, 0x00]), Some(8));
    }

    #[test]
    fn codec_decodes_across_partial_feeds() {
        let mut codec = RtuCodec;
        let response = [0x01, 0x03, 0x02, 0x00, 0x64, 0xB9, 0xAF];
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&response[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&response[3..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.data, vec![0x02, 0x00, 0x64]);
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_surfaces_crc_mismatch_as_error() {
        let mut codec = RtuCodec;
        let mut buf = BytesMut::from(&[0x01, 0x03, 0x02, 0x00, 0x64, 0xB9, 0xF9][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, HalError::CrcMismatch { .. }));
    }

    #[test]
    fn codec_encoder_matches_plain_encode() {
        let frame = read_holding_request(1, 1, 2).unwrap();
        let mut codec = RtuCodec;
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        assert_eq!(&buf[..], frame.encode().as_slice());
    }
}
