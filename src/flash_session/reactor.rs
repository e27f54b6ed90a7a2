//! Readiness based multiplexer driving every connection of a session.
//!
//! One thread, one [`mio::Poll`], any number of non-blocking TCP streams. The
//! reactor owns the registration table: each registered [`Connection`] is
//! looked up by the [`Token`] of its socket, and handed to a [`Dispatch`]
//! implementation together with its readiness.
//!
//! The only blocking point of a session is the bounded wait in
//! [`Reactor::poll`]. A wait that ends without any event while connections are
//! still registered means the session is stalled, and [`Reactor::run`] gives
//! up on all of them at once.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use log::{debug, trace, warn};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use super::connection::Connection;
use crate::error::{FlashError, Result};

const EVENTS_CAPACITY: usize = 128;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Readiness of a socket, as reported by one poll.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct Readiness {
    pub readable: bool,
    pub writable: bool,
}
impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        Readiness {
            // Errors and hang-ups surface through the next read.
            readable: event.is_readable() || event.is_read_closed() || event.is_error(),
            writable: event.is_writable() || event.is_write_closed(),
        }
    }
}

/// Handler for the readiness events of registered connections.
pub(crate) trait Dispatch {
    /// Called once per socket and per poll. The handler may unregister the
    /// connection and register new ones through `reactor`.
    fn dispatch(&mut self, reactor: &mut Reactor, token: Token, readiness: Readiness);
}

pub(crate) struct Reactor {
    poll: Poll,
    events: Events,
    timeout: Duration,
    connections: HashMap<Token, Connection<TcpStream>>,
    /// Tokens are never reused, so a late event for a retired socket cannot
    /// reach another connection.
    next_token: usize,
}
impl Reactor {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Reactor {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            timeout,
            connections: HashMap::new(),
            next_token: 0,
        })
    }

    /// Watch the socket of `connection` for `interest`, and take ownership of
    /// the connection until it is unregistered.
    pub fn register(
        &mut self,
        mut connection: Connection<TcpStream>,
        interest: Interest,
    ) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.poll
            .registry()
            .register(connection.stream_mut(), token, interest)?;
        self.next_token += 1;
        trace!("{}: registered as {:?}", connection.target(), token);
        self.connections.insert(token, connection);
        Ok(token)
    }

    /// Stop watching a socket and give its connection back. The caller is
    /// expected to close it, and nothing else may use it afterwards.
    pub fn unregister(&mut self, token: Token) -> Option<Connection<TcpStream>> {
        let mut connection = self.connections.remove(&token)?;
        if let Err(e) = self.poll.registry().deregister(connection.stream_mut()) {
            // The socket is about to be closed, which removes it from the
            // poller anyway.
            debug!("{}: deregister: {}", connection.target(), e);
        }
        trace!("{}: unregistered {:?}", connection.target(), token);
        Some(connection)
    }

    pub fn connection_mut(&mut self, token: Token) -> Option<&mut Connection<TcpStream>> {
        self.connections.get_mut(&token)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Wait at most `timeout` for sockets to become ready. An empty result
    /// means the wait timed out.
    pub fn poll(&mut self, timeout: Duration) -> io::Result<Vec<(Token, Readiness)>> {
        loop {
            match self.poll.poll(&mut self.events, Some(timeout)) {
                Ok(()) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(self
            .events
            .iter()
            .map(|event| (event.token(), Readiness::from(event)))
            .collect())
    }

    /// Poll and dispatch until no connection is left.
    ///
    /// Fails with [`FlashError::Stalled`] when a poll times out with
    /// connections still registered. Those connections stay registered; use
    /// [`Reactor::drain`] to retire them.
    pub fn run<D: Dispatch>(&mut self, handler: &mut D) -> Result<()> {
        while !self.is_empty() {
            let ready = self.poll(self.timeout)?;
            if ready.is_empty() {
                warn!("event queue reached timeout - check your connection");
                return Err(FlashError::Stalled {
                    pending: self.len(),
                    timeout: self.timeout,
                });
            }
            for (token, readiness) in ready {
                handler.dispatch(self, token, readiness);
            }
        }
        debug!("all connections are closed, exiting event loop");
        Ok(())
    }

    /// Unregister every connection still registered.
    pub fn drain(&mut self) -> Vec<Connection<TcpStream>> {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        tokens
            .into_iter()
            .filter_map(|token| self.unregister(token))
            .collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::rc::Rc;

    use super::*;
    use crate::utils::{Firmware, Target};

    fn connect(listener: &TcpListener) -> Connection<TcpStream> {
        let addr = listener.local_addr().unwrap();
        let target = Rc::new(Target::resolve(&addr.to_string(), 0).unwrap());
        let firmware = Rc::new(Firmware::new(vec![0x55; 4]).unwrap());
        Connection::new(target, firmware, TcpStream::connect(addr).unwrap())
    }

    /// Records what it is given and retires every connection it sees.
    struct Retire {
        seen: Vec<(Token, Readiness)>,
    }
    impl Dispatch for Retire {
        fn dispatch(&mut self, reactor: &mut Reactor, token: Token, readiness: Readiness) {
            self.seen.push((token, readiness));
            if let Some(connection) = reactor.unregister(token) {
                connection.close();
            }
        }
    }

    /// Ignores every event.
    struct Ignore;
    impl Dispatch for Ignore {
        fn dispatch(&mut self, _: &mut Reactor, _: Token, _: Readiness) {}
    }

    #[test]
    fn tokens_are_never_reused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut reactor = Reactor::new(Duration::from_secs(5)).unwrap();

        let first = reactor
            .register(connect(&listener), Interest::READABLE | Interest::WRITABLE)
            .unwrap();
        reactor.unregister(first).unwrap().close();
        let second = reactor
            .register(connect(&listener), Interest::READABLE | Interest::WRITABLE)
            .unwrap();

        assert_ne!(first, second);
        assert!(reactor.unregister(first).is_none());
        assert_eq!(reactor.len(), 1);
    }

    #[test]
    fn connected_socket_becomes_writable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut reactor = Reactor::new(Duration::from_secs(5)).unwrap();
        let token = reactor
            .register(connect(&listener), Interest::READABLE | Interest::WRITABLE)
            .unwrap();

        let mut handler = Retire { seen: Vec::new() };
        reactor.run(&mut handler).unwrap();

        assert!(reactor.is_empty());
        assert_eq!(handler.seen.len(), 1);
        assert_eq!(handler.seen[0].0, token);
        assert!(handler.seen[0].1.writable);
    }

    #[test]
    fn silent_sockets_stall_the_run() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut reactor = Reactor::new(Duration::from_millis(200)).unwrap();
        // Only interested in reads, and the server never writes.
        reactor
            .register(connect(&listener), Interest::READABLE)
            .unwrap();

        match reactor.run(&mut Ignore) {
            Err(FlashError::Stalled { pending, .. }) => assert_eq!(pending, 1),
            other => panic!("expected a stall, got {:?}", other),
        }
        assert_eq!(reactor.drain().len(), 1);
        assert!(reactor.is_empty());
    }

    #[test]
    fn empty_reactor_returns_immediately() {
        let mut reactor = Reactor::new(Duration::from_secs(5)).unwrap();
        assert!(reactor.run(&mut Ignore).is_ok());
    }
}
