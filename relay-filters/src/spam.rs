//! Spam-client filter: streams a mail's content to a SpamAssassin `spamd`
//! over the SPAMC/1.4 protocol, parses its `Spam:`/`Content-length:`
//! response headers, and (unless read-only) returns the rewritten content
//! spamd sends back.

use std::io;

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use relay_message::LineBuffer;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error talking to spamd: {0}")]
    Io(#[from] io::Error),
    #[error("invalid spamd response: {0}")]
    InvalidResponse(String),
    #[error("spamd response headers ended with no Content-length")]
    MissingContentLength,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub username: Option<String>,
    /// When true, the rewritten content spamd returns is discarded: only
    /// the verdict is kept.
    pub read_only: bool,
}

/// The outcome of a spam scan: `verdict` is spamd's `Spam:` header value
/// with a leading "False"/"false" collapsed to empty (mirroring the
/// convention that an empty result means "not spam"); `rewritten` holds
/// spamd's (possibly tag-added) copy of the message when not read-only.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanResult {
    pub verdict: String,
    pub rewritten: Option<Vec<u8>>,
}

/// Sends `content` (with its exact byte length `content_len`) to `stream`
/// as a SPAMC/1.4 `PROCESS` request, then reads back and parses spamd's
/// response.
pub async fn scan<S, R>(
    stream: &mut S,
    config: &Config,
    content_len: u64,
    mut content: R,
) -> Result<ScanResult, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    tracing::debug!(content_len, "sending spam scan request");
    let mut request = String::from("PROCESS SPAMC/1.4\r\n");
    if let Some(username) = &config.username {
        request.push_str(&format!("User: {}\r\n", username));
    }
    request.push_str(&format!("Content-length: {}\r\n\r\n", content_len));
    stream.write_all(request.as_bytes()).await?;
    futures::io::copy(&mut content, stream).await?;
    stream.flush().await?;

    let mut lb = LineBuffer::with_capacity(4096);

    let status_line = next_line(stream, &mut lb).await?;
    if !ok(&status_line) {
        return Err(Error::InvalidResponse(status_line.trim().to_string()));
    }

    let mut verdict = String::new();
    let mut content_length: Option<u64> = None;
    loop {
        let line = next_line(stream, &mut lb).await?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if content_length.is_none() {
                return Err(Error::MissingContentLength);
            }
            break;
        }
        if let Some(rest) = trimmed.strip_prefix("Spam:") {
            verdict = rest.trim().to_string();
        } else if let Some(rest) = strip_prefix_ci(trimmed, "Content-length:") {
            content_length = rest.trim().parse().ok();
        }
    }
    let content_length = content_length.ok_or(Error::MissingContentLength)? as usize;

    let body = take_exact(stream, &mut lb, content_length).await?;
    let rewritten = if config.read_only { None } else { Some(body) };

    Ok(ScanResult {
        verdict: collapse_false(&verdict),
        rewritten,
    })
}

/// Pulls the next CRLF-terminated line from `stream`, topping up `lb` with
/// fresh reads until one is available.
async fn next_line<S: AsyncRead + Unpin>(stream: &mut S, lb: &mut LineBuffer) -> io::Result<String> {
    loop {
        if let Some(line) = lb.next_line(b"\r\n") {
            return Ok(String::from_utf8_lossy(line).into_owned());
        }
        let n = stream.read(lb.write_slot(512)).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "spamd closed the connection",
            ));
        }
        lb.commit(n);
    }
}

/// Pulls exactly `n` bytes from `stream`, topping up `lb` with fresh reads
/// until that many are available.
async fn take_exact<S: AsyncRead + Unpin>(
    stream: &mut S,
    lb: &mut LineBuffer,
    n: usize,
) -> io::Result<Vec<u8>> {
    loop {
        if let Some(bytes) = lb.take(n) {
            return Ok(bytes.to_vec());
        }
        let read = stream.read(lb.write_slot(n)).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "spamd closed the connection",
            ));
        }
        lb.commit(read);
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// `"SPAMD/1.1 0 OK"` is ok; any other status code (eg. `"SPAMD/1.0 99
/// Timeout"`) is not.
fn ok(line: &str) -> bool {
    let line = line.trim_end_matches(['\r', '\n']);
    if !line.starts_with("SPAMD/") {
        return false;
    }
    line.split_whitespace().nth(1) == Some("0")
}

fn collapse_false(verdict: &str) -> String {
    if verdict.len() >= 5 && verdict[..5].eq_ignore_ascii_case("False") {
        String::new()
    } else {
        verdict.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    #[test]
    fn recognizes_ok_status() {
        assert!(ok("SPAMD/1.1 0 OK\r\n"));
        assert!(!ok("SPAMD/1.0 99 Timeout\r\n"));
        assert!(!ok("garbage"));
    }

    #[test]
    fn collapses_false_verdict() {
        assert_eq!(collapse_false("False ; 1.0 / 5.0"), "");
        assert_eq!(collapse_false("True ; 9.0 / 5.0"), "True ; 9.0 / 5.0");
    }

    #[test]
    fn scan_parses_response() {
        smol::block_on(async {
            let body = b"rewritten body\n";
            let response = format!(
                "SPAMD/1.1 0 EX_OK\r\nSpam: True ; 9.0 / 5.0\r\nContent-length: {}\r\n\r\n{}",
                body.len(),
                String::from_utf8_lossy(body),
            );
            // A plain `Cursor<Vec<u8>>` reads and writes the same buffer, so
            // the canned response would be overwritten by our own request;
            // split the two directions instead.
            let mut combined = DuplexCursor {
                read: Cursor::new(response.into_bytes()),
                write: Vec::new(),
            };
            let content = Cursor::new(b"hello world".to_vec());
            let result = scan(
                &mut combined,
                &Config {
                    username: None,
                    read_only: false,
                },
                11,
                content,
            )
            .await
            .unwrap();
            assert_eq!(result.verdict, "True ; 9.0 / 5.0");
            assert_eq!(result.rewritten.unwrap(), body);
        });
    }

    struct DuplexCursor {
        read: Cursor<Vec<u8>>,
        write: Vec<u8>,
    }

    impl AsyncRead for DuplexCursor {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut [u8],
        ) -> std::task::Poll<io::Result<usize>> {
            std::pin::Pin::new(&mut self.read).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for DuplexCursor {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            self.write.extend_from_slice(buf);
            std::task::Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
        fn poll_close(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }
}
