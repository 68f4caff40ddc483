//! DNS blocklist checks: look up a client address against one or more
//! configured DNSBL zones and vote on whether enough of them list it to
//! deny the connection. Grounded on the threshold/timeout semantics of a
//! classic DNSBL client: send one query per zone to a single resolver,
//! count deniers vs. laggards against a configurable threshold.

use std::{net::IpAddr, time::Duration};

use relay_net::{
    dns::{DnsMessage, QueryType},
    Address,
};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("dnsbl config has no fields")]
    Empty,
    #[error("dnsbl config has too few fields for the legacy tcp-address,timeout,threshold,domain... form")]
    BadFieldCount,
    #[error("dnsbl config has fields left over after parsing")]
    UnusedFields,
    #[error("invalid dns server address in dnsbl config: {0}")]
    Address(#[from] relay_net::AddressError),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub dns_server: Address,
    pub threshold: usize,
    pub allow_on_timeout: bool,
    pub timeout: Duration,
    pub zones: Vec<String>,
}

fn is_domain(s: &str) -> bool {
    if s.is_empty() || s.parse::<f64>().is_ok() {
        return false;
    }
    match s.rsplit('.').next() {
        None => true,
        Some(tld) => tld.is_empty() || (tld.chars().all(|c| c.is_ascii_alphanumeric()) && tld.parse::<f64>().is_err()),
    }
}

fn is_positive(s: &str) -> bool {
    !s.starts_with('-')
}

fn parse_ms(s: &str) -> u64 {
    if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<i64>().unwrap_or(0).unsigned_abs() * 1000
    } else {
        s.parse::<i64>().unwrap_or(0).unsigned_abs()
    }
}

impl Config {
    /// Parses either the legacy `tcp-address,timeout,threshold,domain[,domain...]`
    /// form or the current `domain[,domain...[,threshold[,timeout[,tcp-address]]]]`
    /// form (distinguished by whether the first field looks like a domain).
    pub fn parse(config: &str) -> Result<Config, ConfigError> {
        let fields: Vec<&str> = config.split(',').map(str::trim).collect();
        if fields.is_empty() || (fields.len() == 1 && fields[0].is_empty()) {
            return Err(ConfigError::Empty);
        }

        if fields[0].is_empty() || !is_domain(fields[0]) {
            // legacy: tcp-address,timeout,threshold,domain...
            if fields.len() < 4 {
                return Err(ConfigError::BadFieldCount);
            }
            let dns_server = name_server_address(fields[0])?;
            let threshold: usize = fields[2].parse().unwrap_or(0);
            let allow_on_timeout = threshold == 0 || is_positive(fields[1]);
            let timeout = Duration::from_millis(parse_ms(fields[1]));
            let zones = fields[3..].iter().map(|s| s.to_string()).collect();
            Ok(Config {
                dns_server,
                threshold,
                allow_on_timeout,
                timeout,
                zones,
            })
        } else {
            let domains = fields.iter().take_while(|f| is_domain(f)).count();
            let rest = &fields[domains..];
            let mut i = 0;
            let threshold: usize = rest.get(i).map_or(1, |s| s.parse().unwrap_or(1));
            if rest.get(i).is_some() {
                i += 1;
            }
            let timeout_field = rest.get(i).copied().unwrap_or("5000");
            let positive_timeout = is_positive(timeout_field);
            let timeout = Duration::from_millis(parse_ms(timeout_field));
            if rest.get(i).is_some() {
                i += 1;
            }
            let dns_server = name_server_address(rest.get(i).copied().unwrap_or(""))?;
            if rest.get(i).is_some() {
                i += 1;
            }
            if i != rest.len() {
                return Err(ConfigError::UnusedFields);
            }
            let allow_on_timeout = positive_timeout || threshold == 0;
            let zones = fields[..domains].iter().map(|s| s.to_string()).collect();
            Ok(Config {
                dns_server,
                threshold,
                allow_on_timeout,
                timeout,
                zones,
            })
        }
    }
}

fn name_server_address(s: &str) -> Result<Address, ConfigError> {
    if s.is_empty() {
        // No configured resolver: default to the loopback resolver; a real
        // deployment always configures this explicitly.
        Ok(Address::loopback(53, false))
    } else {
        Ok(Address::parse(s, 53)?)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResultType {
    Inactive,
    Local,
    Allow,
    Deny,
    TimeoutAllow,
    TimeoutDeny,
}

impl ResultType {
    pub fn allow(&self) -> bool {
        matches!(
            self,
            ResultType::Inactive | ResultType::Local | ResultType::Allow | ResultType::TimeoutAllow
        )
    }
}

#[derive(Clone, Debug)]
struct ServerResult {
    server: String,
    addresses: Option<Vec<IpAddr>>,
}

impl ServerResult {
    fn valid(&self) -> bool {
        self.addresses.is_some()
    }

    fn denies(&self) -> bool {
        self.addresses.as_ref().map_or(false, |a| !a.is_empty())
    }
}

#[derive(Clone, Debug)]
pub struct DnsBlockResult {
    pub client: Address,
    pub result_type: ResultType,
    results: Vec<ServerResult>,
}

impl DnsBlockResult {
    pub fn allow(&self) -> bool {
        self.result_type.allow()
    }

    pub fn deniers(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.denies())
            .map(|r| r.server.as_str())
            .collect()
    }

    pub fn laggards(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.valid())
            .map(|r| r.server.as_str())
            .collect()
    }

    pub fn log(&self) {
        match self.result_type {
            ResultType::Local => {
                debug!(client = %self.client, "dnsbl: not checking local address");
            }
            ResultType::Inactive => (),
            _ => {
                for r in &self.results {
                    match &r.addresses {
                        Some(a) if a.is_empty() => {
                            debug!(client = %self.client, server = %r.server, "dnsbl: allowed")
                        }
                        Some(a) => {
                            debug!(client = %self.client, server = %r.server, ?a, "dnsbl: denied")
                        }
                        None => debug!(client = %self.client, server = %r.server, "dnsbl: not checked"),
                    }
                }
            }
        }
        if matches!(
            self.result_type,
            ResultType::Deny | ResultType::TimeoutDeny | ResultType::TimeoutAllow
        ) {
            warn!(client = %self.client, result = ?self.result_type, "dnsbl: client flagged");
        }
    }
}

fn is_null_route(ip: &IpAddr) -> bool {
    matches!(ip, IpAddr::V4(v) if v.octets()[0] == 0)
}

/// Sends one query per configured zone and votes on the outcome.
pub async fn check(config: &Config, client: &Address) -> DnsBlockResult {
    if client.is_loopback() || client.is_unique_local() || client.is_link_local() {
        return DnsBlockResult {
            client: client.clone(),
            result_type: ResultType::Local,
            results: Vec::new(),
        };
    }
    if config.zones.is_empty() {
        return DnsBlockResult {
            client: client.clone(),
            result_type: ResultType::Inactive,
            results: Vec::new(),
        };
    }

    let mut results: Vec<ServerResult> = config
        .zones
        .iter()
        .map(|z| ServerResult {
            server: z.clone(),
            addresses: None,
        })
        .collect();

    let query_prefix = match client.query_string() {
        Some(q) => q,
        None => {
            return DnsBlockResult {
                client: client.clone(),
                result_type: ResultType::Inactive,
                results,
            }
        }
    };

    let bind_addr = if config.dns_server.family_is_v6() {
        "[::]:0"
    } else {
        "0.0.0.0:0"
    };
    let socket = match smol::net::UdpSocket::bind(bind_addr).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "dnsbl: failed to bind query socket");
            return DnsBlockResult {
                client: client.clone(),
                result_type: if config.allow_on_timeout {
                    ResultType::TimeoutAllow
                } else {
                    ResultType::TimeoutDeny
                },
                results,
            };
        }
    };

    let qtype = if client.family_is_v6() {
        QueryType::Aaaa
    } else {
        QueryType::A
    };
    let id_base: u16 = 10;
    let server_addr = match config.dns_server {
        Address::Inet(a) => a,
        #[cfg(unix)]
        Address::Unix(_) => {
            return DnsBlockResult {
                client: client.clone(),
                result_type: ResultType::Inactive,
                results,
            }
        }
    };
    for (i, zone) in config.zones.iter().enumerate() {
        let name = format!("{}.{}", query_prefix, zone);
        let id = id_base + i as u16;
        let packet = relay_net::dns::request(qtype, &name, id);
        if let Err(e) = socket.send_to(&packet, server_addr).await {
            warn!(error = %e, server = %zone, "dnsbl: failed to send query");
        }
    }

    let result_type = loop {
        let mut buf = [0u8; 4096];
        let recv = socket.recv_from(&mut buf);
        let timeout = smol::Timer::after(config.timeout);
        futures::pin_mut!(recv);
        futures::pin_mut!(timeout);
        match futures::future::select(recv, timeout).await {
            futures::future::Either::Left((Ok((n, _from)), _)) => {
                let msg = match DnsMessage::parse(&buf[..n]) {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                if !msg.qr || msg.id < id_base || msg.id >= id_base + results.len() as u16 {
                    continue;
                }
                let idx = (msg.id - id_base) as usize;
                results[idx].addresses = Some(
                    msg.addresses
                        .into_iter()
                        .filter(|ip| !is_null_route(ip))
                        .collect(),
                );

                let responders = results.iter().filter(|r| r.valid()).count();
                let deniers = results.iter().filter(|r| r.denies()).count();
                let laggards = results.len() - responders;
                if responders == results.len()
                    || (config.threshold > 0 && deniers >= config.threshold)
                    || (config.threshold > 0 && (deniers + laggards) < config.threshold)
                {
                    break if config.threshold > 0 && deniers >= config.threshold {
                        ResultType::Deny
                    } else {
                        ResultType::Allow
                    };
                }
            }
            futures::future::Either::Left((Err(e), _)) => {
                warn!(error = %e, "dnsbl: error receiving response");
            }
            futures::future::Either::Right(_) => {
                break if config.allow_on_timeout {
                    ResultType::TimeoutAllow
                } else {
                    ResultType::TimeoutDeny
                };
            }
        }
    };

    DnsBlockResult {
        client: client.clone(),
        result_type,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_new_format_with_defaults() {
        let c = Config::parse("zen.spamhaus.org").unwrap();
        assert_eq!(c.zones, vec!["zen.spamhaus.org"]);
        assert_eq!(c.threshold, 1);
        assert_eq!(c.timeout, Duration::from_millis(5000));
    }

    #[test]
    fn parses_new_format_with_threshold_and_timeout() {
        let c = Config::parse("a.example.org,b.example.org,2,2000").unwrap();
        assert_eq!(c.zones.len(), 2);
        assert_eq!(c.threshold, 2);
        assert_eq!(c.timeout, Duration::from_millis(2000));
    }

    #[test]
    fn parses_legacy_format() {
        let c = Config::parse("127.0.0.1:53,2000,1,a.example.org,b.example.org").unwrap();
        assert_eq!(c.zones, vec!["a.example.org", "b.example.org"]);
        assert_eq!(c.threshold, 1);
    }

    #[test]
    fn rejects_empty_config() {
        assert!(matches!(Config::parse(""), Err(ConfigError::Empty)));
    }
}
