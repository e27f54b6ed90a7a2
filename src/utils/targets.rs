//! Network addresses of the devices to flash.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

// =============================================================================
// Public Interface
// =============================================================================

/// A device to flash.
///
/// A target keeps its identity across reconnects: when the device reboots, the
/// connection is replaced but the target stays the same.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Target {
    /// The address as given by the user, used as the key for the outcomes.
    pub name: String,
    /// The resolved socket address of the OTA server.
    pub addr: SocketAddr,
}
impl Target {
    /// Resolve `name` into a target.
    ///
    /// `name` is either a `host:port` pair, or a host name or IP address in
    /// which case `default_port` is used.
    pub fn resolve(name: &str, default_port: u16) -> io::Result<Self> {
        // `host:port` first, whether the host is an IP literal or a name.
        let addr = match name.to_socket_addrs().ok().and_then(|mut addrs| addrs.next()) {
            Some(addr) => addr,
            None => {
                let host = name.trim_start_matches('[').trim_end_matches(']');
                (host, default_port)
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::NotFound,
                            format!("`{}` did not resolve to any address", name),
                        )
                    })?
            }
        };
        Ok(Target {
            name: name.to_owned(),
            addr,
        })
    }
}
impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn bare_ip_gets_default_port() {
    let target = Target::resolve("192.168.4.1", 2222).unwrap();
    assert_eq!(target.addr, "192.168.4.1:2222".parse().unwrap());
    assert_eq!(target.name, "192.168.4.1");
}

#[test]
fn explicit_port_is_kept() {
    let target = Target::resolve("10.0.0.7:4000", 2222).unwrap();
    assert_eq!(target.addr.port(), 4000);
}

#[test]
fn host_name_with_port_keeps_its_port() {
    let target = Target::resolve("localhost:4000", 2222).unwrap();
    assert_eq!(target.addr.port(), 4000);
    assert!(target.addr.ip().is_loopback());
    assert_eq!(target.name, "localhost:4000");
}

#[test]
fn bare_host_name_gets_default_port() {
    let target = Target::resolve("localhost", 2222).unwrap();
    assert_eq!(target.addr.port(), 2222);
}

#[test]
fn bare_ipv6_gets_default_port() {
    let target = Target::resolve("::1", 2222).unwrap();
    assert_eq!(target.addr, "[::1]:2222".parse().unwrap());

    let bracketed = Target::resolve("[::1]", 2222).unwrap();
    assert_eq!(bracketed.addr, target.addr);
}

#[test]
fn display_uses_given_name() {
    let target = Target::resolve("127.0.0.1:9", 2222).unwrap();
    assert_eq!(target.to_string(), "127.0.0.1:9");
}
