//! Host networking stack lifecycle and address helpers.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};

use crate::net::error::{NetError, NetResult, Status};

/// Classification of an address literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    V4,
    V6,
    Invalid,
}

/// One-time startup of the host networking stack.
///
/// Unix needs nothing. On Windows the Winsock startup is forced here so a
/// failure surfaces as [`Status::Setup`] instead of on the first socket call.
pub fn init() -> NetResult<()> {
    #[cfg(windows)]
    {
        socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, None)
            .map_err(|e| NetError::from_io(Status::Setup, &e))?;
    }

    tracing::debug!("network stack initialized");
    Ok(())
}

/// Matching teardown for [`init`]. The standard library owns the Winsock
/// reference count, so there is nothing to release explicitly.
pub fn cleanup() -> NetResult<()> {
    tracing::debug!("network stack cleaned up");
    Ok(())
}

pub fn address_kind(address: &str) -> AddressKind {
    if address.parse::<Ipv4Addr>().is_ok() {
        AddressKind::V4
    } else if address.parse::<Ipv6Addr>().is_ok() {
        AddressKind::V6
    } else {
        AddressKind::Invalid
    }
}

/// True for a literal IPv4 or IPv6 address.
pub fn is_valid_address(address: &str) -> bool {
    address_kind(address) != AddressKind::Invalid
}

/// Resolves `hostname` and returns the first address in presentation form.
pub fn resolve_hostname(hostname: &str) -> NetResult<String> {
    if hostname.is_empty() {
        return Err(NetError::new(Status::Resolve, "empty hostname"));
    }

    let mut addrs = (hostname, 0)
        .to_socket_addrs()
        .map_err(|e| NetError::from_io(Status::Resolve, &e))?;

    let first: IpAddr = addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| NetError::new(Status::Resolve, format!("no addresses found for {hostname}")))?;

    tracing::debug!(hostname, address = %first, "resolved hostname");
    Ok(first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_literals() {
        assert_eq!(address_kind("127.0.0.1"), AddressKind::V4);
        assert_eq!(address_kind("::1"), AddressKind::V6);
        assert_eq!(address_kind("fe80::1:2"), AddressKind::V6);
        assert_eq!(address_kind("localhost"), AddressKind::Invalid);
        assert_eq!(address_kind("256.0.0.1"), AddressKind::Invalid);
        assert_eq!(address_kind(""), AddressKind::Invalid);
    }

    #[test]
    fn resolves_localhost() {
        let addr = resolve_hostname("localhost").unwrap();
        assert!(is_valid_address(&addr));
    }

    #[test]
    fn resolving_literal_returns_it() {
        assert_eq!(resolve_hostname("127.0.0.1").unwrap(), "127.0.0.1");
    }

    #[test]
    fn empty_hostname_is_resolve_error() {
        let err = resolve_hostname("").unwrap_err();
        assert_eq!(err.status(), Status::Resolve);
    }
}
