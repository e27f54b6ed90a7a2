//! Helper types and functions around the firmware image and the targets.

mod firmware;
mod targets;

pub use firmware::{crc32, locate_firmware, Firmware};
pub use targets::Target;
