//! Reads and writes the `X-MailRelay-*` envelope header block that sits
//! alongside each mail's content, one field per line, terminated by an
//! `X-MailRelay-End: 1` marker. Field order, RFC-2822 folding of
//! `ClientCertificate` and xtext round-tripping of the auth/forwarding
//! fields follow the format this store's on-disk layout is modelled on.

use std::io::{self, BufRead, Read, Write};

use relay_message::Email;
use relay_queue::MailMetadata;
use relay_queue_types::{BodyType, EnvelopeInfo};

const PREFIX: &str = "X-MailRelay-";
pub const FORMAT: &str = "e1";

fn xtext_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b == b'+' || b == b'=' || b < 0x21 || b > 0x7e {
            out.push_str(&format!("+{:02X}", b));
        } else {
            out.push(b as char);
        }
    }
    out
}

fn xtext_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'+' && i + 2 < bytes.len() {
            if let Ok(b) = u8::from_str_radix(
                std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""),
                16,
            ) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn fold(s: &str) -> String {
    s.trim().replace('\r', "").replace('\n', "\r\n ")
}

fn unfold(s: &str) -> String {
    s.replace('\n', "")
}

fn email_to_string(e: &Email) -> String {
    let mut out = String::new();
    for slice in e.as_io_slices() {
        out.push_str(std::str::from_utf8(&slice).expect("address is not utf8"));
    }
    out
}

fn parse_email(s: &str) -> io::Result<Email> {
    let buf = format!("{}\0", s);
    match Email::<String>::parse_until(b"\0", b"\0@")(buf.as_bytes()) {
        Ok((rest, email)) if rest == b"\0" => Ok(email),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "malformed address in envelope",
        )),
    }
}

fn write_line(w: &mut impl Write, s: &str) -> io::Result<()> {
    w.write_all(s.as_bytes())?;
    w.write_all(b"\r\n")
}

pub fn write<U>(mut w: impl Write, meta: &MailMetadata<U>) -> io::Result<()> {
    let e = &meta.envelope;
    write_line(&mut w, &format!("{}Format: {}", PREFIX, FORMAT))?;
    write_line(
        &mut w,
        &format!(
            "{}Content: {}",
            PREFIX,
            e.body_type.unwrap_or(BodyType::Unknown).name()
        ),
    )?;
    write_line(
        &mut w,
        &format!(
            "{}From: {}",
            PREFIX,
            meta.from.as_ref().map(email_to_string).unwrap_or_default()
        ),
    )?;
    write_line(&mut w, &format!("{}ToCount: {}", PREFIX, meta.to.len()))?;
    for to in &meta.to {
        // Local-delivery recipients are out of scope for this store, so
        // every recipient is recorded as a remote one.
        write_line(&mut w, &format!("{}To-Remote: {}", PREFIX, email_to_string(to)))?;
    }
    write_line(
        &mut w,
        &format!("{}Authentication: {}", PREFIX, xtext_encode(&e.authentication)),
    )?;
    write_line(&mut w, &format!("{}Client: {}", PREFIX, e.client))?;
    write_line(
        &mut w,
        &format!("{}ClientCertificate: {}", PREFIX, fold(&e.client_certificate)),
    )?;
    write_line(
        &mut w,
        &format!("{}MailFromAuthIn: {}", PREFIX, xtext_encode(&e.mail_from_auth_in)),
    )?;
    write_line(
        &mut w,
        &format!("{}MailFromAuthOut: {}", PREFIX, xtext_encode(&e.mail_from_auth_out)),
    )?;
    write_line(
        &mut w,
        &format!("{}ForwardTo: {}", PREFIX, xtext_encode(&e.forward_to)),
    )?;
    write_line(
        &mut w,
        &format!("{}ForwardToAddress: {}", PREFIX, e.forward_to_address),
    )?;
    write_line(
        &mut w,
        &format!("{}ClientAccountSelector: {}", PREFIX, e.client_account_selector),
    )?;
    write_line(
        &mut w,
        &format!(
            "{}Utf8MailboxNames: {}",
            PREFIX,
            if e.utf8_mailbox_names { "1" } else { "0" }
        ),
    )?;
    write_line(&mut w, &format!("{}End: 1", PREFIX))?;
    Ok(())
}

fn read_line(r: &mut impl BufRead) -> io::Result<String> {
    let mut s = String::new();
    let n = r.read_line(&mut s)?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "envelope truncated",
        ));
    }
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
    Ok(s)
}

/// Reads one logical header value, unfolding RFC-2822 continuation lines
/// (those starting with a space or tab) into the returned string.
fn read_value(r: &mut impl BufRead, key: &str) -> io::Result<String> {
    let line = read_line(r)?;
    let prefix = format!("{}{}:", PREFIX, key);
    let mut value = if line == prefix {
        String::new()
    } else {
        let prefixed = format!("{} ", prefix);
        line.strip_prefix(&prefixed)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, format!("expected {}", prefix))
            })?
            .to_string()
    };
    loop {
        let continues = matches!(r.fill_buf()?.first(), Some(b' ') | Some(b'\t'));
        if !continues {
            break;
        }
        let cont = read_line(r)?;
        value.push('\n');
        value.push_str(cont.trim_start());
    }
    Ok(value)
}

pub fn read(r: impl Read) -> io::Result<(Option<Email>, Vec<Email>, EnvelopeInfo)> {
    let mut r = io::BufReader::new(r);

    let format = read_value(&mut r, "Format")?;
    if format != FORMAT {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown envelope format {:?}", format),
        ));
    }

    let body_type = Some(BodyType::parse(&read_value(&mut r, "Content")?));

    let from_raw = read_value(&mut r, "From")?;
    let from = if from_raw.is_empty() {
        None
    } else {
        Some(parse_email(&from_raw)?)
    };

    let to_count: usize = read_value(&mut r, "ToCount")?
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad ToCount"))?;
    let mut to = Vec::with_capacity(to_count);
    for _ in 0..to_count {
        let line = read_line(&mut r)?;
        let rest = line
            .strip_prefix(&format!("{}To-Remote: ", PREFIX))
            .or_else(|| line.strip_prefix(&format!("{}To-Local: ", PREFIX)))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad 'to' line"))?;
        to.push(parse_email(rest)?);
    }

    let authentication = xtext_decode(&read_value(&mut r, "Authentication")?);
    let client = read_value(&mut r, "Client")?;
    let client_certificate = unfold(&read_value(&mut r, "ClientCertificate")?);
    let mail_from_auth_in = xtext_decode(&read_value(&mut r, "MailFromAuthIn")?);
    let mail_from_auth_out = xtext_decode(&read_value(&mut r, "MailFromAuthOut")?);
    let forward_to = xtext_decode(&read_value(&mut r, "ForwardTo")?);
    let forward_to_address = read_value(&mut r, "ForwardToAddress")?;
    let client_account_selector = read_value(&mut r, "ClientAccountSelector")?;
    let utf8_mailbox_names = read_value(&mut r, "Utf8MailboxNames")? == "1";

    let end = read_line(&mut r)?;
    if !end.starts_with(&format!("{}End", PREFIX)) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing envelope end marker",
        ));
    }

    Ok((
        from,
        to,
        EnvelopeInfo {
            body_type,
            authentication,
            client,
            client_certificate,
            mail_from_auth_in,
            mail_from_auth_out,
            forward_to,
            forward_to_address,
            client_account_selector,
            utf8_mailbox_names,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xtext_round_trips() {
        let tests = ["plain", "with+plus", "with=equals", "with space\ttab"];
        for t in tests {
            assert_eq!(xtext_decode(&xtext_encode(t)), t);
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let meta: MailMetadata<()> = MailMetadata {
            from: Some(parse_email("alice@example.org").unwrap()),
            to: vec![parse_email("bob@example.com").unwrap()],
            envelope: EnvelopeInfo {
                body_type: Some(BodyType::EightBitMime),
                authentication: "plain-user".to_string(),
                client: "10.0.0.1:5432".to_string(),
                client_certificate: String::new(),
                mail_from_auth_in: String::new(),
                mail_from_auth_out: String::new(),
                forward_to: String::new(),
                forward_to_address: String::new(),
                client_account_selector: "acct1".to_string(),
                utf8_mailbox_names: false,
            },
            metadata: (),
        };
        let mut buf = Vec::new();
        write(&mut buf, &meta).unwrap();
        let (from, to, envelope) = read(&buf[..]).unwrap();
        assert_eq!(from.unwrap(), meta.from.unwrap());
        assert_eq!(to, meta.to);
        assert_eq!(envelope.client_account_selector, "acct1");
        assert_eq!(envelope.authentication, "plain-user");
    }
}
