//! Routing filter: resolves a queued mail's `forward-to` into a concrete
//! `forward-to-address`, via MX lookup when `forward-to` is a bare domain.

use relay_net::Address;
use trust_dns_resolver::{
    error::ResolveError, proto::DnsHandle, AsyncResolver, ConnectionProvider,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Resolve(#[from] relay_reactor::resolver::Error),
}

/// A parsed `forward-to` field: either a domain (to be MX-resolved) or
/// a literal address (an RFC-5321 4.1.3 address literal, or a bare
/// `host:port`), together with the port to connect on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ForwardTo {
    pub domain: String,
    pub port: u16,
    pub literal: Option<Address>,
}

/// Parses a `forward-to` envelope field: normally a domain name, optionally
/// with a `:<port>` suffix and an ignored `<user>@` prefix; a
/// square-bracketed address literal (`[1.2.3.4]`, `[ipv6:::1]`) skips the
/// MX lookup entirely.
pub fn parse_forward_to(forward_to: &str) -> ForwardTo {
    let no_user = forward_to.rsplit('@').next().unwrap_or(forward_to);
    let (head, port) = match no_user.rfind(':') {
        Some(pos) => {
            let tail = &no_user[pos + 1..];
            match tail.parse::<u16>() {
                Ok(port) => (&no_user[..pos], port),
                Err(_) => (no_user, 0),
            }
        }
        None => (no_user, 0),
    };
    let literal = address_literal(head, port);
    ForwardTo {
        domain: head.to_string(),
        port,
        literal,
    }
}

/// Parses a bracketed RFC-5321 4.1.3 address literal (`[1.2.3.4]`,
/// `[IPv6:::1]`), optionally suffixed `:<port>`. Returns `None` for
/// anything else, including a bare domain name.
fn address_literal(s: &str, port: u16) -> Option<Address> {
    if s.len() > 2 && s.starts_with('[') && s.ends_with(']') {
        let inner = &s[1..s.len() - 1];
        let port = if port == 0 { 25 } else { port };
        let inner = inner
            .strip_prefix("IPv6:")
            .or_else(|| inner.strip_prefix("ipv6:"))
            .unwrap_or(inner);
        Address::parse(inner, port).ok()
    } else {
        None
    }
}

/// True for the conventional "no forward-to-address" sentinel: any address
/// in `0.0.0.0/8`.
pub fn is_null_route(addr: &Address) -> bool {
    addr.is_null_route()
}

/// Resolves `forward_to` to a concrete address: a literal bypasses the
/// lookup, a bare domain is MX-resolved (falling back to its own A/AAAA
/// records). Returns `None` when the resolved address is the null-route
/// sentinel, meaning "forward-to-address left unset".
pub async fn resolve<C, P>(
    resolver: &AsyncResolver<C, P>,
    forward_to: &ForwardTo,
) -> Result<Option<Address>, Error>
where
    C: DnsHandle<Error = ResolveError>,
    P: ConnectionProvider<Conn = C>,
{
    if let Some(literal) = &forward_to.literal {
        return Ok(if is_null_route(literal) {
            None
        } else {
            Some(literal.clone())
        });
    }
    if forward_to.domain.is_empty() {
        return Ok(None);
    }
    let ip = relay_reactor::resolver::resolve_forward_target(resolver, &forward_to.domain).await?;
    let port = if forward_to.port == 0 {
        25
    } else {
        forward_to.port
    };
    let addr = Address::Inet(std::net::SocketAddr::new(ip, port));
    tracing::debug!(domain = %forward_to.domain, address = %addr, "resolved forward-to-address");
    Ok(if is_null_route(&addr) { None } else { Some(addr) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_domain() {
        let f = parse_forward_to("example.com");
        assert_eq!(f.domain, "example.com");
        assert_eq!(f.port, 0);
        assert!(f.literal.is_none());
    }

    #[test]
    fn parses_domain_with_port() {
        let f = parse_forward_to("example.com:2525");
        assert_eq!(f.domain, "example.com");
        assert_eq!(f.port, 2525);
    }

    #[test]
    fn parses_user_prefix() {
        let f = parse_forward_to("someone@example.com");
        assert_eq!(f.domain, "example.com");
    }

    #[test]
    fn parses_ipv4_literal() {
        let f = parse_forward_to("[192.0.2.1]");
        assert_eq!(f.literal, Some(Address::parse("192.0.2.1", 25).unwrap()));
    }

    #[test]
    fn parses_ipv6_literal() {
        let f = parse_forward_to("[IPv6:::1]");
        assert!(f.literal.is_some());
    }
}
