use async_trait::async_trait;
use futures::io::AsyncRead;
use relay_message::Reply;

use crate::mail::MailMetadata;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport rejected mail permanently: {0}")]
    Permanent(Reply<String>),
    #[error("transport rejected mail transiently: {0}")]
    Transient(Reply<String>),
    #[error("i/o error talking to transport: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivers a single piece of queued mail somewhere -- typically by
/// connecting out with `relay-client` and streaming `reader` as the DATA
/// payload, but any other sink (e.g. a filter's local delivery) can
/// implement this too.
#[async_trait]
pub trait Transport<U>: Clone + Send + Sync + 'static
where
    U: 'static + Send + Sync,
{
    async fn send<R>(&self, meta: &MailMetadata<U>, content: R) -> Result<(), TransportError>
    where
        R: 'static + Send + Unpin + AsyncRead;
}
