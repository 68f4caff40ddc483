use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    str::FromStr,
};

/// An endpoint address: either an internet socket address, or (on unix) a
/// local domain socket path. Listener specs and DNSBL/MX lookups all
/// ultimately resolve to one of these.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Address {
    Inet(SocketAddr),
    #[cfg(unix)]
    Unix(std::path::PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("invalid address: {0}")]
    Parse(String),
}

impl Address {
    pub fn family_is_v4(&self) -> bool {
        matches!(self, Address::Inet(SocketAddr::V4(_)))
    }

    pub fn family_is_v6(&self) -> bool {
        matches!(self, Address::Inet(SocketAddr::V6(_)))
    }

    pub fn loopback(port: u16, v6: bool) -> Address {
        if v6 {
            Address::Inet(SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), port))
        } else {
            Address::Inet(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
        }
    }

    pub fn default_address() -> Address {
        Address::Inet(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }

    /// Parses a literal address, optionally `[bracketed]` as an IP literal
    /// the way a `forward-to` envelope field does, with an optional
    /// trailing `:port`.
    pub fn parse(s: &str, default_port: u16) -> Result<Address, AddressError> {
        let s = s.trim();
        let s = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')).unwrap_or(s);
        if let Ok(addr) = SocketAddr::from_str(s) {
            return Ok(Address::Inet(addr));
        }
        if let Ok(ip) = IpAddr::from_str(s) {
            return Ok(Address::Inet(SocketAddr::new(ip, default_port)));
        }
        // host:port, where host may itself be a bracketed IPv6 literal
        if let Some(idx) = s.rfind(':') {
            let (host, port) = s.split_at(idx);
            let port = &port[1..];
            if let (Ok(ip), Ok(port)) = (IpAddr::from_str(host), u16::from_str(port)) {
                return Ok(Address::Inet(SocketAddr::new(ip, port)));
            }
        }
        Err(AddressError::Parse(s.to_string()))
    }

    pub fn is_loopback(&self) -> bool {
        match self {
            Address::Inet(a) => a.ip().is_loopback(),
            #[cfg(unix)]
            Address::Unix(_) => true,
        }
    }

    pub fn is_link_local(&self) -> bool {
        match self {
            Address::Inet(SocketAddr::V4(a)) => a.ip().is_link_local(),
            Address::Inet(SocketAddr::V6(a)) => (a.ip().segments()[0] & 0xffc0) == 0xfe80,
            #[cfg(unix)]
            Address::Unix(_) => false,
        }
    }

    /// RFC-1918 (v4) / `fc00::/7` (v6) unique-local ranges.
    pub fn is_unique_local(&self) -> bool {
        match self {
            Address::Inet(SocketAddr::V4(a)) => {
                let o = a.ip().octets();
                o[0] == 10
                    || (o[0] == 172 && (16..=31).contains(&o[1]))
                    || (o[0] == 192 && o[1] == 168)
            }
            Address::Inet(SocketAddr::V6(a)) => (a.ip().segments()[0] & 0xfe00) == 0xfc00,
            #[cfg(unix)]
            Address::Unix(_) => false,
        }
    }

    /// `0.0.0.0/8`, used by convention in DNSBL/MX responses to mean "not
    /// listed"/"null route".
    pub fn is_null_route(&self) -> bool {
        matches!(self, Address::Inet(SocketAddr::V4(a)) if a.ip().octets()[0] == 0)
    }

    pub fn host_part_string(&self) -> String {
        match self {
            Address::Inet(a) => a.ip().to_string(),
            #[cfg(unix)]
            Address::Unix(p) => p.display().to_string(),
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Address::Inet(a) => Some(a.port()),
            #[cfg(unix)]
            Address::Unix(_) => None,
        }
    }

    /// The reverse-octet/nibble label a DNSBL query prefixes onto each
    /// configured zone, e.g. `127.0.0.1` -> `"1.0.0.127"`.
    pub fn query_string(&self) -> Option<String> {
        match self {
            Address::Inet(SocketAddr::V4(a)) => {
                let o = a.ip().octets();
                Some(format!("{}.{}.{}.{}", o[3], o[2], o[1], o[0]))
            }
            Address::Inet(SocketAddr::V6(a)) => {
                let mut labels = Vec::with_capacity(32);
                for segment in a.ip().segments().iter().rev() {
                    for nibble_shift in (0..16).step_by(4) {
                        labels.push(format!("{:x}", (segment >> nibble_shift) & 0xf));
                    }
                }
                Some(labels.join("."))
            }
            #[cfg(unix)]
            Address::Unix(_) => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Inet(a) => write!(f, "{}", a),
            #[cfg(unix)]
            Address::Unix(p) => write!(f, "unix:{}", p.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracketed_ipv6_literal() {
        let a = Address::parse("[::1]:25", 0).unwrap();
        assert_eq!(a, Address::Inet("[::1]:25".parse().unwrap()));
    }

    #[test]
    fn parses_bare_ip_with_default_port() {
        let a = Address::parse("10.0.0.1", 25).unwrap();
        assert_eq!(a, Address::Inet("10.0.0.1:25".parse().unwrap()));
    }

    #[test]
    fn query_string_reverses_ipv4_octets() {
        let a = Address::parse("127.0.0.1", 0).unwrap();
        assert_eq!(a.query_string().unwrap(), "1.0.0.127");
    }

    #[test]
    fn recognizes_null_route() {
        let a = Address::parse("0.0.0.0", 0).unwrap();
        assert!(a.is_null_route());
        let a = Address::parse("1.2.3.4", 0).unwrap();
        assert!(!a.is_null_route());
    }

    #[test]
    fn recognizes_private_ranges() {
        assert!(Address::parse("192.168.1.1", 0).unwrap().is_unique_local());
        assert!(Address::parse("10.1.2.3", 0).unwrap().is_unique_local());
        assert!(!Address::parse("8.8.8.8", 0).unwrap().is_unique_local());
    }
}
