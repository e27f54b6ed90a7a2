//! Settings related to the OTA transport and the flashing session.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

use std::time::Duration;

// =============================================================================
// Public Interface
// =============================================================================

/// TCP port the OTA server listens on in the device bootloader.
pub const DEFAULT_OTA_PORT: u16 = 2222;

/// How long the event loop waits for any socket to become ready before it
/// declares the whole session stalled.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(20);

/// Groups all settings used by an `otacom` flashing session and acts as a
/// [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// Port used for targets that do not carry an explicit `host:port`.
    pub port: u16,
    /// Bounded wait of the multiplexer. A poll that returns no event within
    /// this duration aborts the session.
    pub poll_timeout: Duration,
    /// Maximum number of reboot-and-reconnect cycles per target. `None` means
    /// the device is trusted to eventually come back, however many times it
    /// asks to reboot.
    pub max_reboots: Option<u32>,

    /// Path to the firmware image to be pushed. Optional, when not set,
    /// `otacom` will look for `firmware.bin` in the current working directory
    /// and if none was found, it will offer the list of files ending with
    /// `.bin` in the current working directory for selection by the user.
    pub firmware: Option<String>,

    /// Draw a progress bar per target while pushing.
    pub show_progress: bool,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```
/// use otacom::SettingsBuilder;
///
/// let settings = SettingsBuilder::new().port(4242).max_reboots(3).finalize();
/// assert_eq!(settings.port, 4242);
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}
impl SettingsBuilder {
    /// Start building the settings using default values and no firmware path.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                port: DEFAULT_OTA_PORT,
                poll_timeout: DEFAULT_POLL_TIMEOUT,
                max_reboots: None,
                firmware: None,
                show_progress: false,
                _private_use_builder: (),
            },
        }
    }

    /// Set the default OTA server port
    pub fn port(mut self, port: u16) -> Self {
        self.settings.port = port;
        self
    }

    /// Set the multiplexer bounded wait
    pub fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.settings.poll_timeout = poll_timeout;
        self
    }

    /// Cap the number of reconnects after a device reboot
    pub fn max_reboots(mut self, max_reboots: u32) -> Self {
        self.settings.max_reboots = Some(max_reboots);
        self
    }

    /// Set the path to the firmware image
    pub fn firmware<'a>(mut self, firmware: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.firmware = Some(firmware.into().as_ref().to_owned());
        self
    }

    pub fn show_progress(mut self, show_progress: bool) -> Self {
        self.settings.show_progress = show_progress;
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}
impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            port: 2222,
            poll_timeout: Duration::from_secs(20),
            max_reboots: None,
            firmware: None,
            show_progress: false,
            _private_use_builder: (),
        }
    )
}

#[test]
fn port() {
    let settings = SettingsBuilder::new().port(8266).finalize();
    assert_eq!(settings.port, 8266);
}

#[test]
fn poll_timeout() {
    let timeout = Duration::from_millis(250);
    let settings = SettingsBuilder::new().poll_timeout(timeout).finalize();
    assert_eq!(settings.poll_timeout, timeout);
}

#[test]
fn max_reboots() {
    let settings = SettingsBuilder::new().max_reboots(2).finalize();
    assert_eq!(settings.max_reboots, Some(2));
}

#[test]
fn firmware() {
    let settings = SettingsBuilder::new().firmware("blink.bin").finalize();
    assert_eq!(settings.firmware.unwrap(), "blink.bin");
}

#[test]
fn show_progress() {
    let settings = SettingsBuilder::default().show_progress(true).finalize();
    assert!(settings.show_progress);
}
