//! The outbound side: a [`relay_client::Config`] for the SMTP client
//! (insecure-by-default TLS, since no trusted root store is wired in yet)
//! and a [`relay_queue::Transport`] that resolves a queued mail's
//! `forward-to` and hands it to `relay-client`.

use std::{io, net::IpAddr, pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, Cursor};
use relay_client::{Client, DynAsyncReadWrite, TransportError as ClientTransportError};
use relay_message::{Hostname, MaybeUtf8, Reply, ReplyCode};
use relay_queue::TransportError;
use trust_dns_resolver::{error::ResolveError, proto::DnsHandle, AsyncResolver, ConnectionProvider};

pub struct ClientConfig {
    pub hostname: String,
}

#[async_trait]
impl relay_client::Config for ClientConfig {
    fn ehlo_hostname(&self) -> Hostname<String> {
        Hostname::AsciiDomain {
            raw: self.hostname.clone(),
        }
    }

    async fn tls_connect<IO>(&self, io: IO) -> io::Result<DynAsyncReadWrite>
    where
        IO: 'static + Unpin + Send + AsyncRead + AsyncWrite,
    {
        // The remote's certificate isn't verified yet (no trusted root
        // store is wired in), so the SNI name sent here doesn't matter for
        // security -- only for servers that pick a cert by name.
        let connector = relay_reactor::tls::connector(relay_reactor::tls::insecure_client_config());
        let stream = connector.connect("smtp.example", io).await?;
        let (r, w) = stream.split();
        Ok(duplexify::Duplex::new(
            Box::pin(r) as Pin<Box<dyn Send + AsyncRead>>,
            Box::pin(w) as Pin<Box<dyn Send + AsyncWrite>>,
        ))
    }
}

#[derive(Clone)]
pub struct ClientTransport<C, P>
where
    C: DnsHandle<Error = ResolveError>,
    P: ConnectionProvider<Conn = C>,
{
    pub client: Arc<Client<C, P, ClientConfig>>,
    pub resolver: AsyncResolver<C, P>,
}

fn map_client_error(e: ClientTransportError) -> TransportError {
    use relay_client::TransportErrorSeverity as Sev;

    let severity = e.severity();
    let description = e.to_string();
    let reply = match e {
        ClientTransportError::TransientMail(r)
        | ClientTransportError::TransientMailbox(r)
        | ClientTransportError::TransientMailSystem(r)
        | ClientTransportError::PermanentMail(r)
        | ClientTransportError::PermanentMailbox(r)
        | ClientTransportError::PermanentMailSystem(r)
        | ClientTransportError::UnexpectedReplyCode(r) => r,
        _ => Reply {
            code: ReplyCode::LOCAL_ERROR,
            ecode: None,
            text: vec![MaybeUtf8::Utf8(description)],
        },
    };
    match severity {
        Sev::MailPermanent | Sev::MailboxPermanent | Sev::MailSystemPermanent => {
            TransportError::Permanent(reply)
        }
        _ => TransportError::Transient(reply),
    }
}

#[async_trait]
impl<C, P> relay_queue::Transport<()> for ClientTransport<C, P>
where
    C: 'static + Send + Sync + DnsHandle<Error = ResolveError>,
    P: 'static + Send + Sync + ConnectionProvider<Conn = C>,
{
    /// Note: a single connection is (re)established per recipient, since
    /// `relay-client`'s `Sender` only carries one `MAIL FROM`/`RCPT
    /// TO`/`DATA` transaction; recipients sharing a domain still got
    /// grouped onto the same queued mail upstream by the split filter.
    async fn send<R>(
        &self,
        meta: &relay_queue::MailMetadata<()>,
        mut content: R,
    ) -> Result<(), TransportError>
    where
        R: 'static + Send + Unpin + AsyncRead,
    {
        let mut buf = Vec::new();
        content
            .read_to_end(&mut buf)
            .await
            .map_err(TransportError::Io)?;

        let forward_to = relay_filters::parse_forward_to(&meta.envelope.forward_to);
        let address = relay_filters::resolve_forward_to(&self.resolver, &forward_to)
            .await
            .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
            .ok_or_else(|| {
                TransportError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "forward-to-address left unset",
                ))
            })?;

        let (ip, port): (IpAddr, u16) = match address {
            relay_net::Address::Inet(sock) => (sock.ip(), sock.port()),
            relay_net::Address::Unix(_) => {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "cannot forward mail over a unix domain socket",
                )))
            }
        };

        for to in &meta.to {
            let mut sender = self
                .client
                .connect_to_ip(ip, port)
                .await
                .map_err(map_client_error)?;
            sender
                .send(meta.from.as_ref(), to, Cursor::new(buf.clone()))
                .await
                .map_err(map_client_error)?;
        }
        Ok(())
    }
}
