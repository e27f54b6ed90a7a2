//! Per-target connection state machine.
//!
//! A connection drives one TCP socket through the OTA exchange. It only ever
//! reacts to readiness notifications from the [`Reactor`](super::reactor) and
//! never blocks: every read or write stops as soon as the transport would
//! block, and resumes on the next notification.
//!
//! ```text
//!                 START (socket connecting)
//!                   |
//!                   v
//!              .---------.   writable: request frame sent
//!              |  Init   |-----------------------------.
//!              '---------'                             |
//!                                                      v
//!                                              .---------------.
//!                             .----------------| AwaitResponse |
//!                  Success:   |                '---------------'
//!                  offset = 0 v
//!              .--------------.  writable: all payload bytes sent
//!              | PayloadReady |------------------------.
//!              '--------------'                        |
//!                                                      v
//!                                              .-------------.
//!                                              | PayloadSent |
//!                                              '-------------'
//!                                                      | Success
//!                                                      v
//!                                              .---------------.
//!                                              | ClosedSuccess |
//!                                              '---------------'
//!
//!  From any non-terminal phase:
//!    * Rebooting                    => RebootEvent (brand new connection)
//!    * StorageFull, ChecksumFailed,
//!      bad frame, disconnect, error => ClosedFailure
//! ```

use std::fmt;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::rc::Rc;

use hexplay::HexViewBuilder;
use log::{debug, error, log_enabled, trace, warn, Level::Debug};

use super::events::*;
use super::outcomes::Outcome;
use crate::ota_protocol::{self as ota, ResponseCode};
use crate::utils::{Firmware, Target};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// The byte stream a [`Connection`] talks over.
///
/// Implemented by the non-blocking `mio` TCP stream, and by in-memory streams
/// in tests.
pub(crate) trait Transport: Read + Write {
    /// Pending socket error, e.g. a refused connection that was still in
    /// progress when the socket was registered.
    fn take_error(&self) -> io::Result<Option<io::Error>>;

    /// Orderly shutdown of both directions.
    fn shutdown(&self) -> io::Result<()>;
}
impl Transport for mio::net::TcpStream {
    fn take_error(&self) -> io::Result<Option<io::Error>> {
        mio::net::TcpStream::take_error(self)
    }

    fn shutdown(&self) -> io::Result<()> {
        mio::net::TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Phases of a connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Phase {
    /// Connecting, then sending the request frame.
    Init,
    /// Request sent, waiting for the server to accept it.
    AwaitResponse,
    /// Request accepted, sending the payload.
    PayloadReady,
    /// Payload sent, waiting for the server to verify it.
    PayloadSent,
    ClosedSuccess,
    ClosedFailure,
}
impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::ClosedSuccess | Phase::ClosedFailure)
    }
}

/// State of one connection to one target.
///
/// The firmware is shared with every other connection of the session and is
/// never modified. The socket is exclusively owned and is closed exactly once,
/// by [`Connection::close`] or when the connection is dropped.
pub(crate) struct Connection<S: Transport> {
    target: Rc<Target>,
    firmware: Rc<Firmware>,
    stream: S,
    phase: Phase,
    request: [u8; ota::REQUEST_LEN],
    /// Bytes of the request frame already written.
    request_sent: usize,
    /// Bytes of the payload already written. Never exceeds the payload length.
    offset: usize,
    /// Response bytes received and not decoded yet.
    inbound: Vec<u8>,
}
impl<S: Transport> Connection<S> {
    pub fn new(target: Rc<Target>, firmware: Rc<Firmware>, stream: S) -> Self {
        let request = ota::encode_request(firmware.len() as u32, firmware.checksum());
        Connection {
            target,
            firmware,
            stream,
            phase: Phase::Init,
            request,
            request_sent: 0,
            offset: 0,
            inbound: Vec::with_capacity(2 * ota::RESPONSE_READ_LEN),
        }
    }

    pub fn target(&self) -> &Rc<Target> {
        &self.target
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Handle write readiness.
    ///
    /// Sends whatever the current phase has to send, until the transport would
    /// block or the phase has nothing more to send. Calling it in any other
    /// phase is a no-op, so it is safe to call on every notification.
    pub fn on_writable(&mut self) -> Event {
        loop {
            match self.phase {
                Phase::Init => {
                    // A connect that failed after being started shows up here.
                    match self.stream.take_error() {
                        Ok(None) => {}
                        Ok(Some(err)) | Err(err) => return self.transport_failure(err),
                    }
                    match self.stream.write(&self.request[self.request_sent..]) {
                        Ok(0) => return self.transport_failure(io::ErrorKind::WriteZero.into()),
                        Ok(n) => {
                            self.request_sent += n;
                            trace!("{}: {} request bytes written", self.target, n);
                            if self.request_sent == ota::REQUEST_LEN {
                                self.enter(Phase::AwaitResponse);
                                return Event::Idle;
                            }
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Event::Idle,
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(err) => return self.transport_failure(err),
                    }
                }
                Phase::PayloadReady => {
                    let firmware = Rc::clone(&self.firmware);
                    let payload = firmware.bytes();
                    if self.offset == payload.len() {
                        self.enter(Phase::PayloadSent);
                        return Event::Idle;
                    }
                    match self.stream.write(&payload[self.offset..]) {
                        Ok(0) => return self.transport_failure(io::ErrorKind::WriteZero.into()),
                        Ok(n) => {
                            self.offset += n;
                            trace!(
                                "{}: {} payload bytes written ({}/{})",
                                self.target,
                                n,
                                self.offset,
                                payload.len()
                            );
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Event::Idle,
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(err) => return self.transport_failure(err),
                    }
                }
                _ => return Event::Idle,
            }
        }
    }

    /// Handle read readiness.
    ///
    /// Reads until the transport would block, decoding responses as they
    /// complete. Stops at the first response that retires the connection.
    pub fn on_readable(&mut self) -> Event {
        loop {
            let mut buf = [0u8; ota::RESPONSE_READ_LEN];
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    warn!("unexpected disconnect from {}", self.target);
                    return self.finish(Outcome::Failure);
                }
                Ok(n) => {
                    if log_enabled!(Debug) {
                        let view = HexViewBuilder::new(&buf[..n])
                            .address_offset(0)
                            .row_width(16)
                            .finish();
                        debug!("{}: received {} bytes\n{}", self.target, n, view);
                    }
                    self.inbound.extend_from_slice(&buf[..n]);
                    // One read may carry several responses, or part of one.
                    loop {
                        match ota::decode_response(&self.inbound) {
                            Ok(None) => break,
                            Ok(Some(code)) => {
                                self.inbound.drain(..ota::RESPONSE_LEN);
                                let event = self.on_response(code);
                                if event.retires_connection() {
                                    return event;
                                }
                            }
                            Err(err) => {
                                error!("{}: invalid response: {}", self.target, err);
                                return self.finish(Outcome::Failure);
                            }
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Event::Idle,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return self.transport_failure(err),
            }
        }
    }

    /// Orderly shutdown of the socket, consuming the connection.
    pub fn close(self) {
        match self.stream.shutdown() {
            Ok(()) => trace!("{}: socket closed", self.target),
            // The peer may already be gone, the socket is released anyway.
            Err(e) => trace!("{}: shutdown: {}", self.target, e),
        }
    }

    fn on_response(&mut self, code: ResponseCode) -> Event {
        match code {
            ResponseCode::Success => match self.phase {
                Phase::AwaitResponse => {
                    debug!("{}: transfer request accepted", self.target);
                    self.offset = 0;
                    self.enter(Phase::PayloadReady);
                    if self.firmware.is_empty() {
                        self.enter(Phase::PayloadSent);
                    }
                    Event::Idle
                }
                Phase::PayloadSent => {
                    debug!("{}: payload acknowledged", self.target);
                    self.finish(Outcome::Success)
                }
                phase => {
                    debug!("{}: ignoring success while {:?}", self.target, phase);
                    Event::Idle
                }
            },
            ResponseCode::Rebooting => {
                debug!("{}: server is rebooting into its bootloader", self.target);
                Event::Reboot(RebootEvent {
                    target: Rc::clone(&self.target),
                })
            }
            ResponseCode::StorageFull | ResponseCode::ChecksumFailed => {
                error!("ota server @ {}: {}", self.target, code);
                self.finish(Outcome::Failure)
            }
        }
    }

    fn transport_failure(&mut self, err: io::Error) -> Event {
        warn!("{}: transport error: {}", self.target, err);
        self.finish(Outcome::Failure)
    }

    fn finish(&mut self, outcome: Outcome) -> Event {
        self.enter(match outcome {
            Outcome::Success => Phase::ClosedSuccess,
            _ => Phase::ClosedFailure,
        });
        Event::Done(DoneEvent {
            target: Rc::clone(&self.target),
            outcome,
        })
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{}: {:?} => {:?}", self.target, self.phase, phase);
        self.phase = phase;
    }
}
impl<S: Transport> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target.name)
            .field("phase", &self.phase)
            .field("request_sent", &self.request_sent)
            .field("offset", &self.offset)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
