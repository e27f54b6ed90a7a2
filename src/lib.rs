//! Otacom pushes a firmware image to one or more embedded devices over TCP.
//! The devices run an OTA server in their bootloader (or in their application,
//! which then reboots into the bootloader on request). The image integrity is
//! verified by the device with a CRC-32 announced before the transfer.
//!
//! All devices are flashed at the same time, from a single thread. Each device
//! gets its own connection, driven by a small request/response state machine,
//! and a readiness based event loop multiplexes all of them:
//!
//! * Sockets are non-blocking. Partial writes and split reads are normal and
//!   simply resume on the next readiness notification.
//! * A device answering that it reboots into its bootloader gets a brand new
//!   connection; its outcome stays pending until that connection finishes.
//! * Every device ends with exactly one outcome, success or failure, which is
//!   only ever written by terminal transitions of its connection.
//! * The only blocking point is the bounded wait of the event loop. If nothing
//!   happens on any socket during that wait, the whole session is aborted and
//!   devices still in flight are reported as failed.
//!
//! The connection state machine follows a few principles:
//!
//! * Can only be in one phase at any time.
//! * Transitions are triggered by typed **events** and follow defined
//!   semantics. Phases never go backwards; a reboot replaces the whole
//!   connection instead.
//! * The closed sets of phases, response codes and outcomes are enums, so any
//!   new value must be handled at compile-time.
//!
//! **Example**
//! ```no_run
//! use otacom::{flash_all, SettingsBuilder};
//!
//! let settings = SettingsBuilder::new().port(2222).finalize();
//! let report = flash_all("firmware.bin", &["192.168.4.1"], &settings)?;
//! assert!(report.all_succeeded());
//! # Ok::<(), otacom::FlashError>(())
//! ```

mod error;
mod flash_session;
pub mod ota_protocol;
mod settings;
mod utils;

pub use error::{FlashError, FrameError};
pub use flash_session::{flash_all, FlashReport, FlashSession, Outcome};
pub use settings::{Settings, SettingsBuilder, DEFAULT_OTA_PORT, DEFAULT_POLL_TIMEOUT};
pub use utils::{crc32, locate_firmware, Firmware, Target};
