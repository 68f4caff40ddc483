#![no_main]

#[macro_use]
extern crate libfuzzer_sys;

use std::{borrow::Cow, io, pin::Pin};

use async_trait::async_trait;
use duplexify::Duplex;
use futures::{executor, io::Cursor, AsyncRead, AsyncWrite};

use relay_server::{
    ConnectionMetadata, Decision, EscapedDataReader, IsAlreadyTls, MailMetadata,
};

struct DiscardConfig;

#[async_trait]
impl relay_server::Config for DiscardConfig {
    type ConnectionUserMeta = ();
    type MailUserMeta = ();

    fn hostname(&self) -> Cow<'static, str> {
        "fuzz.example.org".into()
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
        Err(io::Error::new(io::ErrorKind::InvalidInput, "no tls in fuzzing"))
    }

    async fn handle_mail<'a, R>(
        &self,
        reader: &mut EscapedDataReader<'a, R>,
        _meta: MailMetadata<()>,
        _conn_meta: &mut ConnectionMetadata<()>,
    ) -> Decision
    where
        R: Send + Unpin + AsyncRead,
    {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf).await;
        if reader.is_finished() {
            reader.complete();
        }
        Decision::Accept
    }
}

fuzz_target!(|data: &[u8]| {
    let mut resp = Vec::new();
    let io = Duplex::new(Cursor::new(data), Cursor::new(&mut resp));
    let _ = executor::block_on(relay_server::interact(
        io,
        IsAlreadyTls::No,
        (),
        std::sync::Arc::new(DiscardConfig),
    ));
});
