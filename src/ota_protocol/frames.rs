//! Request and response frames of the OTA protocol.

use std::convert::TryFrom;
use std::fmt;

use crate::error::FrameError;

// =============================================================================
// Public Interface
// =============================================================================

/// Every frame, in both directions, starts with these four bytes.
pub const MAGIC: &[u8; 4] = b"OTA\n";

/// Size of a request frame: magic, payload length and checksum.
pub const REQUEST_LEN: usize = 12;

/// Meaningful size of a response frame: magic and a code byte.
pub const RESPONSE_LEN: usize = 5;

/// Size of the reads used to receive responses.
pub const RESPONSE_READ_LEN: usize = 8;

/// Transfer request sent by the client once connected.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Request {
    /// Size of the firmware image that will follow.
    pub payload_len: u32,
    /// CRC-32 over the whole firmware image.
    pub checksum: u32,
}

/// Codes the OTA server can answer with.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResponseCode {
    /// The request was accepted, or the payload was received and verified.
    Success = 0,
    /// The image does not fit in the device flash.
    StorageFull = 1,
    /// The received payload does not match the announced checksum.
    ChecksumFailed = 2,
    /// The device is not running its bootloader yet and reboots into it. The
    /// client has to connect again.
    Rebooting = 3,
}
impl TryFrom<u8> for ResponseCode {
    type Error = FrameError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ResponseCode::Success),
            1 => Ok(ResponseCode::StorageFull),
            2 => Ok(ResponseCode::ChecksumFailed),
            3 => Ok(ResponseCode::Rebooting),
            other => Err(FrameError::UnknownCode(other)),
        }
    }
}
impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResponseCode::Success => "success",
            ResponseCode::StorageFull => "storage full",
            ResponseCode::ChecksumFailed => "checksum failed",
            ResponseCode::Rebooting => "rebooting",
        };
        f.write_str(text)
    }
}

/// Build the 12 bytes request frame. Integers are little endian.
pub fn encode_request(payload_len: u32, checksum: u32) -> [u8; REQUEST_LEN] {
    let mut frame = [0u8; REQUEST_LEN];
    frame[0..4].copy_from_slice(MAGIC);
    frame[4..8].copy_from_slice(&payload_len.to_le_bytes());
    frame[8..12].copy_from_slice(&checksum.to_le_bytes());
    frame
}

/// Parse a request frame, as the OTA server does.
pub fn decode_request(buf: &[u8]) -> Result<Request, FrameError> {
    if buf.len() < REQUEST_LEN {
        return Err(FrameError::Truncated {
            expected: REQUEST_LEN,
            actual: buf.len(),
        });
    }
    if &buf[0..4] != MAGIC {
        return Err(FrameError::BadMagic);
    }
    Ok(Request {
        payload_len: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        checksum: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
    })
}

/// Build a response frame, as the OTA server does.
pub fn encode_response(code: ResponseCode) -> [u8; RESPONSE_LEN] {
    let mut frame = [0u8; RESPONSE_LEN];
    frame[0..4].copy_from_slice(MAGIC);
    frame[4] = code as u8;
    frame
}

/// Parse the bytes received so far for a response.
///
/// Returns `Ok(None)` while the bytes are a strict prefix of a valid response
/// (the frame was split by the transport), and fails as soon as the bytes
/// diverge from the magic. Only the first [`RESPONSE_LEN`] bytes are looked
/// at; whatever follows belongs to the next response.
pub fn decode_response(buf: &[u8]) -> Result<Option<ResponseCode>, FrameError> {
    let magic_len = buf.len().min(MAGIC.len());
    if buf[..magic_len] != MAGIC[..magic_len] {
        return Err(FrameError::BadMagic);
    }
    if buf.len() < RESPONSE_LEN {
        return Ok(None);
    }
    ResponseCode::try_from(buf[4]).map(Some)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crc32;

    #[test]
    fn request_layout_is_little_endian() {
        let frame = encode_request(0x0403_0201, 0xddcc_bbaa);
        assert_eq!(
            frame,
            [b'O', b'T', b'A', b'\n', 0x01, 0x02, 0x03, 0x04, 0xaa, 0xbb, 0xcc, 0xdd]
        );
    }

    #[test]
    fn request_round_trips_length_and_checksum() {
        for payload in [&b""[..], &b"x"[..], &[0xa5; 4099][..]].iter() {
            let checksum = crc32(payload);
            let frame = encode_request(payload.len() as u32, checksum);
            let request = decode_request(&frame).unwrap();
            assert_eq!(request.payload_len as usize, payload.len());
            assert_eq!(request.checksum, checksum);
        }
    }

    #[test]
    fn empty_payload_request_carries_empty_crc() {
        let frame = encode_request(0, crc32(&[]));
        assert_eq!(&frame[4..], &[0u8; 8]);
    }

    #[test]
    fn short_request_is_truncated() {
        assert_eq!(
            decode_request(b"OTA\n\x01"),
            Err(FrameError::Truncated {
                expected: 12,
                actual: 5
            })
        );
    }

    #[test]
    fn request_with_wrong_magic_is_rejected() {
        let mut frame = encode_request(1, 2);
        frame[0] = b'X';
        assert_eq!(decode_request(&frame), Err(FrameError::BadMagic));
    }

    #[test]
    fn every_response_code_decodes() {
        for code in [
            ResponseCode::Success,
            ResponseCode::StorageFull,
            ResponseCode::ChecksumFailed,
            ResponseCode::Rebooting,
        ]
        .iter()
        {
            assert_eq!(decode_response(&encode_response(*code)), Ok(Some(*code)));
        }
    }

    #[test]
    fn bytes_after_the_code_are_not_decoded() {
        assert_eq!(
            decode_response(b"OTA\n\x03\xff\xff\xff"),
            Ok(Some(ResponseCode::Rebooting))
        );
    }

    #[test]
    fn partial_response_is_incomplete() {
        assert_eq!(decode_response(b"OT"), Ok(None));
        assert_eq!(decode_response(b"OTA\n"), Ok(None));
    }

    #[test]
    fn response_diverging_from_magic_is_rejected() {
        assert_eq!(decode_response(b"X"), Err(FrameError::BadMagic));
        assert_eq!(decode_response(b"HTTP/1.1"), Err(FrameError::BadMagic));
    }

    #[test]
    fn unknown_response_code_is_rejected() {
        assert_eq!(
            decode_response(b"OTA\n\x07"),
            Err(FrameError::UnknownCode(7))
        );
    }
}
