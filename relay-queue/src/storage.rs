use std::{future::Future, io, pin::Pin};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::prelude::*;

use crate::{mail::MailMetadata, QueueId};

pub trait QueuedMail: Send + Sync + 'static {
    fn id(&self) -> QueueId;
    fn scheduled_at(&self) -> DateTime<Utc>;
    fn last_attempt(&self) -> Option<DateTime<Utc>>;
}

pub trait InflightMail: Send + Sync + 'static {
    fn id(&self) -> QueueId;
}

#[async_trait]
pub trait StorageEnqueuer<QM: QueuedMail>: Send + AsyncWrite {
    async fn commit(self) -> io::Result<QM>;
}

/// Storage backend for the queue: holds mail content plus metadata across
/// the New (queued) / Locked (inflight) / Busy (inflight, being retried
/// after cancellation) lifecycle.
#[async_trait]
pub trait Storage<U>: Clone + Send + Sync + 'static
where
    U: 'static + Send + Sync,
{
    type Enqueuer: StorageEnqueuer<Self::QueuedMail>;
    type InflightMail: InflightMail;
    type QueuedMail: QueuedMail;
    type Reader: Send + AsyncRead;

    async fn list_queue(
        &self,
    ) -> Pin<Box<dyn Send + Stream<Item = Result<Self::QueuedMail, (io::Error, Option<QueueId>)>>>>;

    async fn find_inflight(
        &self,
    ) -> Pin<
        Box<dyn Send + Stream<Item = Result<Self::InflightMail, (io::Error, Option<QueueId>)>>>,
    >;

    async fn read_inflight(
        &self,
        mail: &Self::InflightMail,
    ) -> Result<(MailMetadata<U>, Self::Reader), io::Error>;

    fn enqueue<'s, 'a>(
        &'s self,
        meta: MailMetadata<U>,
    ) -> Pin<Box<dyn 'a + Send + Future<Output = io::Result<Self::Enqueuer>>>>
    where
        's: 'a;

    async fn reschedule(
        &self,
        mail: &mut Self::QueuedMail,
        at: DateTime<Utc>,
        last_attempt: Option<DateTime<Utc>>,
    ) -> io::Result<()>;

    fn send_start<'s, 'a>(
        &'s self,
        mail: Self::QueuedMail,
    ) -> Pin<
        Box<
            dyn 'a
                + Send
                + Future<Output = Result<Option<Self::InflightMail>, (Self::QueuedMail, io::Error)>>,
        >,
    >
    where
        's: 'a;

    fn send_done<'s, 'a>(
        &'s self,
        mail: Self::InflightMail,
    ) -> Pin<Box<dyn 'a + Send + Future<Output = Result<(), (Self::InflightMail, io::Error)>>>>
    where
        's: 'a;

    fn send_cancel<'s, 'a>(
        &'s self,
        mail: Self::InflightMail,
    ) -> Pin<
        Box<
            dyn 'a
                + Send
                + Future<
                    Output = Result<Option<Self::QueuedMail>, (Self::InflightMail, io::Error)>,
                >,
        >,
    >
    where
        's: 'a;
}
