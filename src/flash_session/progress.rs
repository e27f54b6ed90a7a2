//! Per-target progress bars.

use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::outcomes::Outcome;

// =============================================================================
// Crate-Public Interface
// =============================================================================

pub(crate) struct TransferProgress {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}
impl TransferProgress {
    /// Bars are only drawn when `visible` is set; otherwise all updates are
    /// silently dropped.
    pub fn new(visible: bool) -> Self {
        let multi = if visible {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        TransferProgress {
            multi,
            bars: HashMap::new(),
        }
    }

    pub fn add(&mut self, target: &str, payload_len: usize) {
        let bar = self.multi.add(ProgressBar::new(payload_len as u64));
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "[OTA] {prefix:>21} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_prefix(target.to_owned());
        bar.set_message("connecting");
        self.bars.insert(target.to_owned(), bar);
    }

    pub fn set_position(&self, target: &str, sent: usize) {
        if let Some(bar) = self.bars.get(target) {
            bar.set_position(sent as u64);
        }
    }

    pub fn set_message(&self, target: &str, message: &'static str) {
        if let Some(bar) = self.bars.get(target) {
            bar.set_message(message);
        }
    }

    /// The target rebooted, start over with a new connection.
    pub fn restart(&self, target: &str) {
        if let Some(bar) = self.bars.get(target) {
            bar.reset();
            bar.set_message("rebooting");
        }
    }

    pub fn finish(&self, target: &str, outcome: Outcome) {
        if let Some(bar) = self.bars.get(target) {
            match outcome {
                Outcome::Success => bar.finish_with_message("✅ flashed"),
                Outcome::Failure => bar.abandon_with_message("💥 failed"),
                Outcome::Pending => bar.abandon_with_message("⌛ stalled"),
            }
        }
    }
}
