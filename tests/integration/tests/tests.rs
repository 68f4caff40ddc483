use std::{
    borrow::Cow,
    io,
    net::{IpAddr, Ipv4Addr},
    pin::Pin,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::{io::Cursor, AsyncRead, AsyncWrite};

use relay_message::{Email, EscapedDataReader, Hostname, Reply, ReplyCode};
use relay_server::{ConnectionMetadata, Decision, IsAlreadyTls, MailMetadata};

struct SenderConfig;

#[async_trait]
impl relay_client::Config for SenderConfig {
    fn ehlo_hostname(&self) -> Hostname<String> {
        Hostname::AsciiDomain {
            raw: "sender.example.org".to_string(),
        }
    }

    fn can_do_tls(&self) -> bool {
        false
    }

    async fn tls_connect<IO>(&self, _io: IO) -> io::Result<relay_client::DynAsyncReadWrite>
    where
        IO: 'static + Unpin + Send + AsyncRead + AsyncWrite,
    {
        unimplemented!("this test never negotiates TLS")
    }
}

type ReceivedMail = (Option<Email>, Vec<Email>, Vec<u8>);

struct ReceiverConfig {
    mails: Arc<Mutex<Vec<ReceivedMail>>>,
}

#[async_trait]
impl relay_server::Config for ReceiverConfig {
    type ConnectionUserMeta = ();
    type MailUserMeta = ();

    fn hostname(&self) -> Cow<'static, str> {
        "receiver.example.org".into()
    }

    async fn new_mail(&self, _conn_meta: &mut ConnectionMetadata<()>) {}

    async fn tls_accept<IO>(
        &self,
        _io: IO,
        _conn_meta: &mut ConnectionMetadata<()>,
    ) -> io::Result<
        duplexify::Duplex<Pin<Box<dyn Send + AsyncRead>>, Pin<Box<dyn Send + AsyncWrite>>>,
    >
    where
        IO: 'static + Unpin + Send + AsyncRead + AsyncWrite,
    {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "this test never negotiates TLS",
        ))
    }

    async fn filter_to(
        &self,
        email: &mut Email<&str>,
        _meta: &mut MailMetadata<()>,
        _conn_meta: &mut ConnectionMetadata<()>,
    ) -> Decision {
        if *email.localpart.raw() == "forbidden" {
            Decision::Reject(Reply {
                code: ReplyCode::MAILBOX_UNAVAILABLE,
                ecode: None,
                text: vec!["No such mailbox".into()],
            })
        } else {
            Decision::Accept
        }
    }

    async fn handle_mail<'a, R>(
        &self,
        reader: &mut EscapedDataReader<'a, R>,
        meta: MailMetadata<()>,
        _conn_meta: &mut ConnectionMetadata<()>,
    ) -> Decision
    where
        R: Send + Unpin + AsyncRead,
    {
        let mut text = Vec::new();
        reader
            .read_to_end(&mut text)
            .await
            .expect("reading the mail contents");
        assert!(reader.is_finished());
        reader.complete();
        self.mails
            .lock()
            .expect("poisoned mutex")
            .push((meta.from, meta.to, text));
        Decision::Accept
    }
}

async fn run_receiver(
    listener: smol::net::TcpListener,
    cfg: Arc<ReceiverConfig>,
) -> anyhow::Result<()> {
    let (stream, _peer) = listener.accept().await?;
    relay_server::interact(stream, IsAlreadyTls::No, (), cfg).await?;
    Ok(())
}

/// Drives a real `relay-client` `Sender` against a real `relay-server`
/// `interact` loop over a loopback TCP connection, and checks the mail
/// makes it all the way to the receiving side's `handle_mail`.
#[test]
fn delivers_mail_end_to_end() {
    smol::block_on(async {
        let listener = smol::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("binding the loopback listener");
        let port = listener.local_addr().unwrap().port();

        let mails = Arc::new(Mutex::new(Vec::new()));
        let receiver_cfg = Arc::new(ReceiverConfig {
            mails: mails.clone(),
        });
        let server = smol::Task::spawn(run_receiver(listener, receiver_cfg));

        let resolver = async_std_resolver::resolver_from_system_conf()
            .await
            .expect("configuring the resolver");
        let client = relay_client::Client::new(resolver, Arc::new(SenderConfig));

        let from = Email::parse_bracketed(b"<someone@example.org>").unwrap();
        let to = Email::parse_bracketed(b"<allowed@example.org>").unwrap();

        let mut sender = client
            .connect_to_ip(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
            .await
            .expect("connecting to the receiver");
        sender
            .send(Some(&from), &to, Cursor::new(&b"Hello, world!\r\n.\r\n"[..]))
            .await
            .expect("sending the mail");
        drop(sender);

        server.await.expect("the receiver task failed");

        let mails = mails.lock().unwrap();
        assert_eq!(mails.len(), 1);
        let (got_from, got_to, got_text) = &mails[0];
        assert_eq!(got_from.as_ref(), Some(&from));
        assert_eq!(got_to.len(), 1);
        assert_eq!(got_to[0], to);
        assert_eq!(&got_text[..], b"Hello, world!\r\n.\r\n");
    });
}

/// A recipient the receiving side's `filter_to` rejects should surface as a
/// permanent `TransportError` on the sending side, and no mail should reach
/// `handle_mail`.
#[test]
fn rejected_recipient_never_reaches_handle_mail() {
    smol::block_on(async {
        let listener = smol::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("binding the loopback listener");
        let port = listener.local_addr().unwrap().port();

        let mails = Arc::new(Mutex::new(Vec::new()));
        let receiver_cfg = Arc::new(ReceiverConfig {
            mails: mails.clone(),
        });
        let server = smol::Task::spawn(run_receiver(listener, receiver_cfg));

        let resolver = async_std_resolver::resolver_from_system_conf()
            .await
            .expect("configuring the resolver");
        let client = relay_client::Client::new(resolver, Arc::new(SenderConfig));

        let from = Email::parse_bracketed(b"<someone@example.org>").unwrap();
        let to = Email::parse_bracketed(b"<forbidden@example.org>").unwrap();

        let mut sender = client
            .connect_to_ip(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
            .await
            .expect("connecting to the receiver");
        let err = sender
            .send(Some(&from), &to, Cursor::new(&b"Hello, world!\r\n.\r\n"[..]))
            .await
            .expect_err("the receiver should have rejected this recipient");
        assert!(matches!(err, relay_client::TransportError::PermanentMail(_)));
        drop(sender);

        server.await.expect("the receiver task failed");

        assert!(mails.lock().unwrap().is_empty());
    });
}
