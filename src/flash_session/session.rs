//! The flashing session: one firmware image, many targets.
//!
//! The session reads the image once, opens one connection per target and runs
//! the [`Reactor`] until every connection is closed. It is the [`Dispatch`]
//! handler of the reactor: it forwards readiness to the connection state
//! machines and acts on the events they return.
//!
//! ```text
//!   target ---> connect ---> register ---> dispatch <-----------.
//!                  ^                          |                 |
//!                  |                          v                 |
//!                  |                 .-----------------.  Idle  |
//!                  |                 | Connection SM   |--------'
//!                  |                 '-----------------'
//!                  |                    |          |
//!                  |            Reboot  |          | Done
//!                  '--------------------'          v
//!                                          record outcome, close
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::Path;
use std::rc::Rc;

use log::{debug, error, info, trace, warn};
use mio::net::TcpStream;
use mio::{Interest, Token};

use super::connection::{Connection, Phase};
use super::events::*;
use super::outcomes::{FlashReport, Outcome, OutcomeTable};
use super::progress::TransferProgress;
use super::reactor::{Dispatch, Reactor, Readiness};
use crate::error::{FlashError, Result};
use crate::settings::Settings;
use crate::utils::{Firmware, Target};

// =============================================================================
// Public Interface
// =============================================================================

/// Push the firmware image at `firmware_path` to every address in
/// `addresses` and report the outcome for each of them.
///
/// An address is either `host:port` or a bare host, in which case the port
/// from `settings` is used. Failures of individual targets are reported in the
/// returned [`FlashReport`]; an `Err` means nothing could be attempted at all.
///
/// **Example**
/// ```no_run
/// use otacom::{flash_all, Outcome, SettingsBuilder};
///
/// let settings = SettingsBuilder::new().finalize();
/// let report = flash_all("blink.bin", &["192.168.4.1", "192.168.4.2"], &settings)?;
/// for (target, outcome) in &report.outcomes {
///     println!("{}: {}", target, outcome);
/// }
/// assert!(report.outcome("192.168.4.1").is_some());
/// # Ok::<(), otacom::FlashError>(())
/// ```
pub fn flash_all<P, S>(firmware_path: P, addresses: &[S], settings: &Settings) -> Result<FlashReport>
where
    P: AsRef<Path>,
    S: AsRef<str>,
{
    let firmware = Firmware::read(firmware_path)?;
    FlashSession::new(firmware, settings.clone()).run(addresses)
}

/// A flashing session over an in-memory firmware image.
pub struct FlashSession {
    settings: Settings,
    firmware: Rc<Firmware>,
    outcomes: OutcomeTable,
    connections: BTreeMap<String, u32>,
    reboots: BTreeMap<String, u32>,
    progress: TransferProgress,
}
impl FlashSession {
    pub fn new(firmware: Firmware, settings: Settings) -> Self {
        let progress = TransferProgress::new(settings.show_progress);
        FlashSession {
            settings,
            firmware: Rc::new(firmware),
            outcomes: OutcomeTable::default(),
            connections: BTreeMap::new(),
            reboots: BTreeMap::new(),
            progress,
        }
    }

    /// Flash every address and wait until all of them are done, or until the
    /// session stalls.
    pub fn run<S: AsRef<str>>(mut self, addresses: &[S]) -> Result<FlashReport> {
        if addresses.is_empty() {
            return Err(FlashError::NoTargets);
        }
        info!(
            "pushing {} bytes (crc32 {:#010x}) to {} target(s)",
            self.firmware.len(),
            self.firmware.checksum(),
            addresses.len()
        );

        let mut reactor = Reactor::new(self.settings.poll_timeout)?;
        // Resolved address of each device, with the name it was first given.
        let mut devices: HashMap<SocketAddr, String> = HashMap::new();
        for address in addresses {
            let name = address.as_ref();
            let target = match Target::resolve(name, self.settings.port) {
                Ok(target) => Some(Rc::new(target)),
                Err(e) => {
                    error!("cannot resolve {}: {}", name, e);
                    None
                }
            };
            if let Some(target) = &target {
                if let Some(first) = devices.get(&target.addr) {
                    warn!(
                        "{} is the same device as {} ({}), flashing it once",
                        name, first, target.addr
                    );
                    continue;
                }
                devices.insert(target.addr, name.to_owned());
            }
            if !self.outcomes.insert_pending(name) {
                warn!("{} is listed more than once, flashing it once", name);
                continue;
            }
            self.progress.add(name, self.firmware.len());

            match target {
                Some(target) => {
                    if !self.connect(&mut reactor, target) {
                        self.resolve(name, Outcome::Failure);
                    }
                }
                None => self.resolve(name, Outcome::Failure),
            }
        }

        let stalled = match reactor.run(&mut self) {
            Ok(()) => Vec::new(),
            Err(FlashError::Stalled { pending, timeout }) => {
                warn!(
                    "no activity for {:?}, giving up on {} connection(s)",
                    timeout, pending
                );
                for connection in reactor.drain() {
                    self.progress
                        .finish(&connection.target().name, Outcome::Pending);
                    connection.close();
                }
                self.outcomes.pending()
            }
            Err(e) => return Err(e),
        };

        Ok(self.outcomes.finalize(stalled, self.connections))
    }

    /// Start a non-blocking connect to `target` and register it. Returns
    /// `false` when the target is left without a connection.
    fn connect(&mut self, reactor: &mut Reactor, target: Rc<Target>) -> bool {
        let stream = match TcpStream::connect(target.addr) {
            Ok(stream) => stream,
            Err(e) => {
                error!("error connecting socket to {}: {}", target, e);
                return false;
            }
        };
        let connection = Connection::new(Rc::clone(&target), Rc::clone(&self.firmware), stream);
        match reactor.register(connection, Interest::READABLE | Interest::WRITABLE) {
            Ok(token) => {
                let opened = self.connections.entry(target.name.clone()).or_insert(0);
                *opened += 1;
                debug!("{}: connection #{} is {:?}", target, opened, token);
                true
            }
            Err(e) => {
                error!("cannot watch the socket to {}: {}", target, e);
                false
            }
        }
    }

    /// The device is rebooting into its bootloader: connect again, unless the
    /// reboot ceiling is reached.
    fn reconnect(&mut self, reactor: &mut Reactor, target: Rc<Target>) {
        let reboots = self.reboots.entry(target.name.clone()).or_insert(0);
        *reboots += 1;
        let reboots = *reboots;

        if let Some(max) = self.settings.max_reboots {
            if reboots > max {
                error!("{} asked to reboot {} times, giving up", target, reboots);
                self.resolve(&target.name, Outcome::Failure);
                return;
            }
        }

        info!("{} is rebooting, reconnecting (reboot #{})", target, reboots);
        self.progress.restart(&target.name);
        if !self.connect(reactor, Rc::clone(&target)) {
            self.resolve(&target.name, Outcome::Failure);
        }
    }

    fn resolve(&mut self, target: &str, outcome: Outcome) {
        match outcome {
            Outcome::Success => info!("payload sent successfully to {}", target),
            _ => warn!("flashing {} failed", target),
        }
        self.outcomes.record(target, outcome);
        self.progress.finish(target, outcome);
    }
}
impl Dispatch for FlashSession {
    fn dispatch(&mut self, reactor: &mut Reactor, token: Token, readiness: Readiness) {
        let connection = match reactor.connection_mut(token) {
            Some(connection) => connection,
            None => {
                trace!("ignoring event for retired {:?}", token);
                return;
            }
        };

        let mut event = Event::Idle;
        if readiness.readable {
            event = connection.on_readable();
        }
        // Always try to write after a read. The read may have moved the phase
        // to one with bytes to send, and with edge-triggered readiness the
        // socket will not be reported writable again.
        if !event.retires_connection() {
            event = connection.on_writable();
        }

        if !event.retires_connection() {
            debug_assert!(!connection.phase().is_terminal());
            let name = &connection.target().name;
            self.progress.set_position(name, connection.offset());
            self.progress.set_message(name, phase_message(connection.phase()));
            return;
        }

        if let Some(connection) = reactor.unregister(token) {
            connection.close();
        }
        match event {
            Event::Done(done) => self.resolve(&done.target.name, done.outcome),
            Event::Reboot(reboot) => self.reconnect(reactor, reboot.target),
            Event::Idle => {}
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

fn phase_message(phase: Phase) -> &'static str {
    match phase {
        Phase::Init => "connecting",
        Phase::AwaitResponse => "waiting for the device",
        Phase::PayloadReady => "pushing",
        Phase::PayloadSent => "verifying",
        Phase::ClosedSuccess | Phase::ClosedFailure => "closed",
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
