//! MX-then-A/AAAA resolution, as needed by the routing filter: given a
//! domain, find the address its mail should actually be forwarded to.

use std::net::IpAddr;

use trust_dns_resolver::{
    error::ResolveError, proto::DnsHandle, AsyncResolver, ConnectionProvider, IntoName,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} is not a valid dns name: {1}")]
    BadName(String, trust_dns_resolver::error::ResolveError),
    #[error("MX lookup for {0} failed: {1}")]
    Mx(String, ResolveError),
    #[error("address lookup for {0} failed: {1}")]
    Ip(String, ResolveError),
    #[error("{0} has no usable MX or address records")]
    NoRecords(String),
}

/// Resolves the best address to deliver mail for `domain` to: the lowest-
/// preference MX target's address, falling back to the domain's own
/// address when it has no MX records.
pub async fn resolve_forward_target<C, P>(
    resolver: &AsyncResolver<C, P>,
    domain: &str,
) -> Result<IpAddr, Error>
where
    C: DnsHandle<Error = ResolveError>,
    P: ConnectionProvider<Conn = C>,
{
    let mx_lookup = resolver.mx_lookup(domain).await;
    let target_name = match mx_lookup {
        Ok(lookup) => {
            let best = lookup
                .iter()
                .min_by_key(|record| record.preference())
                .map(|record| record.exchange().clone());
            match best {
                Some(name) => name,
                None => domain
                    .into_name()
                    .map_err(|e| Error::BadName(domain.to_string(), e))?,
            }
        }
        Err(e) if matches!(e.kind(), trust_dns_resolver::error::ResolveErrorKind::NoRecordsFound { .. }) => {
            domain
                .into_name()
                .map_err(|e| Error::BadName(domain.to_string(), e))?
        }
        Err(e) => return Err(Error::Mx(domain.to_string(), e)),
    };

    let ip_lookup = resolver
        .lookup_ip(target_name.clone())
        .await
        .map_err(|e| Error::Ip(target_name.to_string(), e))?;
    ip_lookup
        .iter()
        .next()
        .ok_or_else(|| Error::NoRecords(domain.to_string()))
}
