//! `otacom` OTA wire protocol.
//!
//! The client opens a TCP connection to the OTA server running on the device
//! and exchanges fixed-layout frames with it:
//!
//! ```text
//!  client                                   device
//!    |  request: "OTA\n" | len LE32 | crc LE32  |
//!    |----------------------------------------->|
//!    |          response: "OTA\n" | code        |
//!    |<-----------------------------------------|   Success / StorageFull /
//!    |                payload bytes             |   Rebooting
//!    |----------------------------------------->|
//!    |          response: "OTA\n" | code        |
//!    |<-----------------------------------------|   Success / ChecksumFailed
//! ```
//!
//! The codec is stateless. Progress through the exchange is tracked by the
//! connection state machine in [`flash_session`](crate::flash_session).
//!
//! **Example** - Building a request frame:
//! ```
//! use otacom::ota_protocol::{decode_request, encode_request};
//!
//! let frame = encode_request(10, 0x456c_d746);
//! assert_eq!(&frame[..4], b"OTA\n");
//! assert_eq!(decode_request(&frame).unwrap().payload_len, 10);
//! ```

mod frames;

pub use frames::{
    decode_request, decode_response, encode_request, encode_response, Request, ResponseCode,
    MAGIC, REQUEST_LEN, RESPONSE_LEN, RESPONSE_READ_LEN,
};
