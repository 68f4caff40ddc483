//! Parses listener specs (`fd#N` or a literal address) and binds them.
//!
//! Interface-name specs (`eth0-ipv4`, querying the OS interface table and
//! one listener per discovered address, with debounced rebind on
//! interface-change events) are not implemented: that needs netlink/
//! `getifaddrs` plumbing this crate doesn't pull in. A spec naming an
//! interface is rejected rather than silently ignored.

use std::io;

use relay_net::Address;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListenerSpec {
    Fd(u32),
    Address(Address),
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerSpecError {
    #[error("{0}")]
    Address(#[from] relay_net::AddressError),
    #[error("interface-name listener specs ({0:?}) are not supported")]
    InterfaceName(String),
}

pub fn parse_spec(s: &str) -> Result<ListenerSpec, ListenerSpecError> {
    if let Some(n) = s.strip_prefix("fd#") {
        if let Ok(n) = n.parse() {
            return Ok(ListenerSpec::Fd(n));
        }
    }
    match Address::parse(s, 25) {
        Ok(addr) => Ok(ListenerSpec::Address(addr)),
        Err(_) => Err(ListenerSpecError::InterfaceName(s.to_string())),
    }
}

/// Wildcard defaults used when the configured spec list is empty.
pub fn default_specs() -> Vec<ListenerSpec> {
    vec![
        ListenerSpec::Address(Address::parse("0.0.0.0:25", 25).unwrap()),
        ListenerSpec::Address(Address::parse("[::]:25", 25).unwrap()),
    ]
}

pub async fn bind(spec: &ListenerSpec) -> io::Result<smol::net::TcpListener> {
    match spec {
        ListenerSpec::Address(Address::Inet(addr)) => smol::net::TcpListener::bind(*addr).await,
        #[cfg(unix)]
        ListenerSpec::Address(Address::Unix(_)) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix domain socket listeners are not supported here",
        )),
        ListenerSpec::Fd(n) => bind_fd(*n),
    }
}

#[cfg(unix)]
fn bind_fd(fd: u32) -> io::Result<smol::net::TcpListener> {
    use std::{convert::TryFrom, os::unix::io::FromRawFd};
    let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd as i32) };
    std_listener.set_nonblocking(true)?;
    smol::net::TcpListener::try_from(std_listener)
}

#[cfg(not(unix))]
fn bind_fd(_fd: u32) -> io::Result<smol::net::TcpListener> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "fd listener specs require unix",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fd_spec() {
        assert_eq!(parse_spec("fd#3").unwrap(), ListenerSpec::Fd(3));
    }

    #[test]
    fn parses_literal_address() {
        assert!(matches!(
            parse_spec("0.0.0.0:25").unwrap(),
            ListenerSpec::Address(Address::Inet(_))
        ));
    }

    #[test]
    fn rejects_interface_name() {
        assert!(matches!(
            parse_spec("eth0-ipv4"),
            Err(ListenerSpecError::InterfaceName(_))
        ));
    }
}
