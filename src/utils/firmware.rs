//! The firmware image pushed to the devices and the helpers to find it.

use std::fs;
use std::path::{Path, PathBuf};

use console::{style, Term};
use crc::{Crc, CRC_32_ISO_HDLC};
use dialoguer::{theme::ColorfulTheme, Select};
use log::{debug, info};

use crate::error::{FlashError, Result};
use crate::Settings;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const DEFAULT_IMAGE: &str = "firmware.bin";
const CANCEL_ITEM: &str = "🔙cancel and go back...";

// =============================================================================
// Public Interface
// =============================================================================

/// Standard CRC-32 (IEEE 802.3) of `bytes`, as verified by the OTA server.
pub fn crc32(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

/// An immutable firmware image and its checksum.
///
/// The checksum is computed once, when the image is created, and the image is
/// then shared read-only by every connection of a session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Firmware {
    bytes: Vec<u8>,
    checksum: u32,
}
impl Firmware {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        // The request frame only has 4 bytes for the payload size.
        if bytes.len() as u64 > u64::from(u32::MAX) {
            return Err(FlashError::FirmwareTooLarge {
                size: bytes.len() as u64,
            });
        }
        let checksum = crc32(&bytes);
        debug!("firmware: {} bytes, crc32 {:#010x}", bytes.len(), checksum);
        Ok(Firmware { bytes, checksum })
    }

    /// Read the whole image at `path` into memory.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| FlashError::FirmwareRead {
            path: path.to_path_buf(),
            source,
        })?;
        info!("loaded firmware image `{}`", path.display());
        Self::new(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }
}

/// Find the firmware image to push.
///
/// Uses the path from the settings when there is one, then `firmware.bin` in
/// the current working directory, and finally asks the user to pick one of the
/// `.bin` files in the current working directory. Returns `None` if the user
/// cancels the selection.
pub fn locate_firmware(settings: &Settings) -> Option<PathBuf> {
    if let Some(path) = &settings.firmware {
        return Some(PathBuf::from(path));
    }

    let default = Path::new(DEFAULT_IMAGE);
    if default.is_file() {
        debug!("using `{}` from the current directory", DEFAULT_IMAGE);
        return Some(default.to_path_buf());
    }

    debug!("Looking for an image file in current directory");
    loop {
        match select_image_file_interactive() {
            Some(ref name) if name == CANCEL_ITEM => return None,
            Some(name) => return Some(PathBuf::from(name)),
            None => {
                debug!("No firmware image file was selected!");
                // Try again with a refreshed list of files
            }
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

fn image_files_in(dir: &Path) -> Vec<String> {
    let mut items: Vec<String> = match fs::read_dir(dir) {
        Ok(files) => files
            .filter_map(std::result::Result::ok)
            .filter(|f| f.path().extension().unwrap_or_default() == "bin")
            .filter_map(|f| f.file_name().to_str().map(String::from))
            .collect(),
        Err(ref e) => {
            info!("error: {}", e.to_string());
            Vec::new()
        }
    };
    items.sort();
    items
}

fn select_image_file_interactive() -> Option<String> {
    // List files ending with ".bin" in the current working directory and
    // ask the user to select one out of them.
    let mut items = image_files_in(Path::new("."));
    if items.is_empty() {
        debug!("There are no image files in the current directory");
    }
    items.push(CANCEL_ITEM.into());

    let selection = Select::with_theme(&ColorfulTheme::default())
        .items(&items)
        .with_prompt(format!(
            "Select a firmware image file to push (`{}` to refresh):",
            style("Esc").cyan()
        ))
        .default(0)
        .interact_on_opt(&Term::stdout());

    match selection {
        Ok(Some(index)) => Some(items[index].clone()),
        Ok(None) => {
            debug!("user did not select any firmware image file");
            None
        }
        Err(ref e) => {
            info!("error: {}", e.to_string());
            None
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SettingsBuilder;

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn crc32_of_nothing_is_zero() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn checksum_is_computed_on_creation() {
        let firmware = Firmware::new((0u8..10).collect()).unwrap();
        assert_eq!(firmware.len(), 10);
        assert_eq!(firmware.checksum(), crc32(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]));
    }

    #[test]
    fn read_keeps_file_content_unmodified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blink.bin");
        fs::write(&path, [0xde_u8, 0xad, 0xbe, 0xef]).unwrap();

        let firmware = Firmware::read(&path).unwrap();
        assert_eq!(firmware.bytes(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn read_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");

        match Firmware::read(&path) {
            Err(FlashError::FirmwareRead { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn explicit_firmware_path_wins() {
        let settings = SettingsBuilder::new().firmware("images/app.bin").finalize();
        assert_eq!(
            locate_firmware(&settings),
            Some(PathBuf::from("images/app.bin"))
        );
    }

    #[test]
    fn only_bin_files_are_offered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.bin", "a.bin", "notes.txt", "app.uf2"].iter() {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert_eq!(image_files_in(dir.path()), vec!["a.bin", "b.bin"]);
    }
}
