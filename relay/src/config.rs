//! The inbound-facing [`relay_server::Config`] implementation: runs the
//! hello/from/to filters, accepts `STARTTLS` when a certificate was
//! configured, checks incoming clients against any configured DNSBL zones,
//! and hands completed mail off to the queue.

use std::{io, net::SocketAddr, pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use relay_message::{Email, EnhancedReplyCode, EscapedDataReader, Reply, ReplyCode};
use relay_queue_types::EnvelopeInfo;
use relay_server::{ChunkReader, ConnectionMetadata, Decision, MailMetadata};
use tracing::warn;
use trust_dns_resolver::{error::ResolveError, proto::DnsHandle, ConnectionProvider};

use crate::transport::ClientTransport;

/// Per-mail state threaded through `filter_from`/`filter_to`/`handle_mail`
/// (or the `BDAT` equivalents): the envelope fields destined for the
/// `X-MailRelay-*` header lines, plus the content accumulated so far.
#[derive(Default)]
pub struct MailState {
    pub envelope: EnvelopeInfo,
    pub content: Vec<u8>,
}

pub struct RelayConfig<C, P>
where
    C: DnsHandle<Error = ResolveError>,
    P: ConnectionProvider<Conn = C>,
{
    pub hostname: String,
    pub storage: Arc<relay_queue_fs::FsStorage<()>>,
    pub transport: Arc<ClientTransport<C, P>>,
    pub acceptor: Option<async_tls::TlsAcceptor>,
    pub dnsbl: Vec<relay_dnsbl::Config>,
}

/// Checks `client` against every configured DNSBL zone, denying the
/// connection if any of them lists it. Called once per accepted TCP
/// connection, before the SMTP banner is sent.
pub async fn dnsbl_check(zones: &[relay_dnsbl::Config], client: SocketAddr) -> bool {
    let addr = relay_net::Address::Inet(client);
    for config in zones {
        let result = relay_dnsbl::check(config, &addr).await;
        result.log();
        if !result.allow() {
            return false;
        }
    }
    true
}

fn internal_error() -> Decision {
    Decision::Reject(Reply {
        code: ReplyCode::LOCAL_ERROR,
        ecode: Some(EnhancedReplyCode::TRANSIENT_UNDEFINED.into()),
        text: vec!["Internal server error".into()],
    })
}

impl<C, P> RelayConfig<C, P>
where
    C: 'static + Send + Sync + DnsHandle<Error = ResolveError>,
    P: 'static + Send + Sync + ConnectionProvider<Conn = C>,
{
    async fn enqueue(
        &self,
        envelope: EnvelopeInfo,
        from: Option<Email>,
        to: Vec<Email>,
        content: Vec<u8>,
    ) -> Decision {
        let queue_meta = relay_queue::MailMetadata {
            from,
            to,
            envelope,
            metadata: (),
        };
        let enqueuer = match self.storage.enqueue(queue_meta).await {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to open queue slot for incoming mail");
                return internal_error();
            }
        };
        futures::pin_mut!(enqueuer);
        if let Err(e) = enqueuer.write_all(&content).await {
            warn!(error = %e, "failed to write mail content to the queue");
            return internal_error();
        }
        match enqueuer.commit().await {
            Ok(queued) => {
                let storage = self.storage.clone();
                let transport = self.transport.clone();
                smol::Task::spawn(relay_queue::send_queued_mail(storage, transport, queued))
                    .detach();
                Decision::Accept
            }
            Err(e) => {
                warn!(error = %e, "failed to commit queued mail");
                internal_error()
            }
        }
    }
}

#[async_trait]
impl<C, P> relay_server::Config for RelayConfig<C, P>
where
    C: 'static + Send + Sync + DnsHandle<Error = ResolveError>,
    P: 'static + Send + Sync + ConnectionProvider<Conn = C>,
{
    type ConnectionUserMeta = SocketAddr;
    type MailUserMeta = MailState;

    async fn new_mail(
        &self,
        conn_meta: &mut ConnectionMetadata<Self::ConnectionUserMeta>,
    ) -> Self::MailUserMeta {
        MailState {
            envelope: EnvelopeInfo {
                client: conn_meta.user.to_string(),
                ..EnvelopeInfo::default()
            },
            content: Vec::new(),
        }
    }

    fn can_do_tls(&self, conn_meta: &ConnectionMetadata<Self::ConnectionUserMeta>) -> bool {
        self.acceptor.is_some()
            && !conn_meta.is_encrypted
            && conn_meta.hello.as_ref().map(|h| h.is_ehlo).unwrap_or(false)
    }

    async fn tls_accept<IO>(
        &self,
        io: IO,
        _conn_meta: &mut ConnectionMetadata<Self::ConnectionUserMeta>,
    ) -> io::Result<
        duplexify::Duplex<Pin<Box<dyn Send + AsyncRead>>, Pin<Box<dyn Send + AsyncWrite>>>,
    >
    where
        IO: 'static + Unpin + Send + AsyncRead + AsyncWrite,
    {
        let acceptor = self
            .acceptor
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "TLS is not configured"))?;
        let stream = acceptor.accept(io).await?;
        let (r, w) = stream.split();
        Ok(duplexify::Duplex::new(
            Box::pin(r) as Pin<Box<dyn Send + AsyncRead>>,
            Box::pin(w) as Pin<Box<dyn Send + AsyncWrite>>,
        ))
    }

    async fn filter_from(
        &self,
        _from: &mut Option<Email<&str>>,
        _meta: &mut MailMetadata<Self::MailUserMeta>,
        _conn_meta: &mut ConnectionMetadata<Self::ConnectionUserMeta>,
    ) -> Decision {
        Decision::Accept
    }

    async fn filter_to(
        &self,
        to: &mut Email<&str>,
        meta: &mut MailMetadata<Self::MailUserMeta>,
        _conn_meta: &mut ConnectionMetadata<Self::ConnectionUserMeta>,
    ) -> Decision {
        if meta.user.envelope.forward_to.is_empty() {
            if let Some(hostname) = &to.hostname {
                meta.user.envelope.forward_to = hostname.raw().to_string();
            }
        }
        Decision::Accept
    }

    async fn handle_mail<'a, R>(
        &self,
        stream: &mut EscapedDataReader<'a, R>,
        meta: MailMetadata<Self::MailUserMeta>,
        _conn_meta: &mut ConnectionMetadata<Self::ConnectionUserMeta>,
    ) -> Decision
    where
        R: Send + Unpin + AsyncRead,
    {
        let mut content = Vec::new();
        let read_res = stream.read_to_end(&mut content).await;
        if !stream.is_finished() {
            return Decision::Accept;
        }
        stream.complete();
        if let Err(e) = read_res {
            warn!(error = %e, "failed to read mail content");
            return internal_error();
        }

        let MailMetadata { user, from, to } = meta;
        self.enqueue(user.envelope, from, to, content).await
    }

    fn can_do_chunking(&self) -> bool {
        true
    }

    async fn handle_chunk<'a, R>(
        &self,
        stream: &mut ChunkReader<'a, R>,
        meta: &mut MailMetadata<Self::MailUserMeta>,
        _conn_meta: &mut ConnectionMetadata<Self::ConnectionUserMeta>,
    ) -> Decision
    where
        R: Send + Unpin + AsyncRead,
    {
        let mut chunk = Vec::new();
        let read_res = stream.read_to_end(&mut chunk).await;
        if !stream.is_finished() {
            return Decision::Accept;
        }
        stream.complete();
        if let Err(e) = read_res {
            warn!(error = %e, "failed to read BDAT chunk");
            return internal_error();
        }
        meta.user.content.extend(chunk);
        Decision::Accept
    }

    async fn handle_chunk_last(
        &self,
        meta: MailMetadata<Self::MailUserMeta>,
        _conn_meta: &mut ConnectionMetadata<Self::ConnectionUserMeta>,
    ) -> Decision {
        let MailMetadata { user, from, to } = meta;
        self.enqueue(user.envelope, from, to, user.content).await
    }
}
