//! A minimal single-packet DNS message codec (RFC 1035 §4), just enough to
//! issue an A/AAAA query and read back the answer addresses. Used by the
//! DNS blocklist check, which needs to send one packet per configured
//! zone/server and count how many came back with an answer -- a shape
//! `trust-dns-resolver`'s high-level stub resolver doesn't expose.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const HEADER_LEN: usize = 12;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueryType {
    A,
    Aaaa,
}

impl QueryType {
    fn code(self) -> u16 {
        match self {
            QueryType::A => 1,
            QueryType::Aaaa => 28,
        }
    }
}

/// Builds a single-question, recursion-desired query for `name`.
pub fn request(qtype: QueryType, name: &str, id: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + name.len() + 16);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&0x0100u16.to_be_bytes()); // RD=1
    buf.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    buf.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    for label in name.trim_end_matches('.').split('.') {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
    buf.extend_from_slice(&qtype.code().to_be_bytes());
    buf.extend_from_slice(&1u16.to_be_bytes()); // QCLASS=IN
    buf
}

#[derive(Debug, thiserror::Error)]
pub enum DnsMessageError {
    #[error("dns message shorter than the fixed header")]
    Truncated,
    #[error("dns message malformed")]
    Malformed,
}

#[derive(Debug)]
pub struct DnsMessage {
    pub id: u16,
    pub qr: bool,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub addresses: Vec<IpAddr>,
}

impl DnsMessage {
    pub fn valid(&self) -> bool {
        true
    }

    pub fn parse(buf: &[u8]) -> Result<DnsMessage, DnsMessageError> {
        if buf.len() < HEADER_LEN {
            return Err(DnsMessageError::Truncated);
        }
        let id = u16::from_be_bytes([buf[0], buf[1]]);
        let flags = u16::from_be_bytes([buf[2], buf[3]]);
        let qr = (flags & 0x8000) != 0;
        let tc = (flags & 0x0200) != 0;
        let rcode = (flags & 0x000f) as u8;
        let qdcount = u16::from_be_bytes([buf[4], buf[5]]);
        let ancount = u16::from_be_bytes([buf[6], buf[7]]);

        if tc {
            return Ok(DnsMessage {
                id,
                qr,
                rcode,
                qdcount,
                ancount,
                addresses: Vec::new(),
            });
        }

        let mut pos = HEADER_LEN;
        for _ in 0..qdcount {
            pos = skip_name(buf, pos)?;
            pos += 4; // QTYPE + QCLASS
        }

        let mut addresses = Vec::new();
        for _ in 0..ancount {
            pos = skip_name(buf, pos)?;
            if pos + 10 > buf.len() {
                return Err(DnsMessageError::Malformed);
            }
            let rtype = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
            let rdlength = u16::from_be_bytes([buf[pos + 8], buf[pos + 9]]) as usize;
            pos += 10;
            if pos + rdlength > buf.len() {
                return Err(DnsMessageError::Malformed);
            }
            let rdata = &buf[pos..pos + rdlength];
            match (rtype, rdlength) {
                (1, 4) => addresses.push(IpAddr::V4(Ipv4Addr::new(
                    rdata[0], rdata[1], rdata[2], rdata[3],
                ))),
                (28, 16) => {
                    let mut segments = [0u16; 8];
                    for (i, segment) in segments.iter_mut().enumerate() {
                        *segment = u16::from_be_bytes([rdata[i * 2], rdata[i * 2 + 1]]);
                    }
                    addresses.push(IpAddr::V6(Ipv6Addr::from(segments)));
                }
                _ => (),
            }
            pos += rdlength;
        }

        Ok(DnsMessage {
            id,
            qr,
            rcode,
            qdcount,
            ancount,
            addresses,
        })
    }
}

/// Advances past a (possibly compressed) domain name, returning the
/// position right after it. Does not follow pointers recursively beyond
/// one hop, which is all a single-level RR name needs.
fn skip_name(buf: &[u8], mut pos: usize) -> Result<usize, DnsMessageError> {
    loop {
        if pos >= buf.len() {
            return Err(DnsMessageError::Malformed);
        }
        let len = buf[pos];
        if len == 0 {
            return Ok(pos + 1);
        } else if (len & 0xc0) == 0xc0 {
            if pos + 1 >= buf.len() {
                return Err(DnsMessageError::Malformed);
            }
            return Ok(pos + 2);
        } else {
            pos += 1 + len as usize;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_encodes_a_query() {
        let buf = request(QueryType::A, "1.0.0.127.dnsbl.example.org", 42);
        assert_eq!(u16::from_be_bytes([buf[0], buf[1]]), 42);
        assert_eq!(u16::from_be_bytes([buf[4], buf[5]]), 1); // QDCOUNT
    }

    #[test]
    fn parse_rejects_truncated_header() {
        assert!(matches!(
            DnsMessage::parse(&[0, 1, 2]),
            Err(DnsMessageError::Truncated)
        ));
    }

    #[test]
    fn parse_reads_response_header_fields() {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&42u16.to_be_bytes());
        buf[2..4].copy_from_slice(&0x8180u16.to_be_bytes()); // QR=1, RA=1
        let msg = DnsMessage::parse(&buf).unwrap();
        assert_eq!(msg.id, 42);
        assert!(msg.qr);
        assert_eq!(msg.rcode, 0);
    }
}
