//! `otacom` flashing session.
//!
//! A session pushes one firmware image to many devices at once, over one TCP
//! connection per device, all driven from a single thread by a readiness
//! based event loop.
//!
//! **Example** - Flashing two devices:
//! ```no_run
//! use otacom::{self as ota, Outcome};
//!
//! let settings = ota::SettingsBuilder::new().max_reboots(3).finalize();
//! let report = ota::flash_all("firmware.bin", &["192.168.4.1", "192.168.4.2"], &settings)?;
//! if !report.all_succeeded() {
//!     for (target, outcome) in &report.outcomes {
//!         if *outcome != Outcome::Success {
//!             eprintln!("{} was not flashed", target);
//!         }
//!     }
//! }
//! # Ok::<(), ota::FlashError>(())
//! ```

mod connection;
mod events;
mod outcomes;
mod progress;
mod reactor;
mod session;

pub use outcomes::{FlashReport, Outcome};
pub use session::{flash_all, FlashSession};
