use std::{sync::Arc, time::Duration};

use futures::prelude::*;
use tracing::warn;

use crate::{
    send_queued_mail::send_queued_mail,
    storage::{InflightMail as _, Storage},
    transport::Transport,
};

/// The time a mail is allowed to stay inflight (locked) before the runner
/// assumes its worker crashed and puts it back in the queue.
const INFLIGHT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Drains the queue once at startup (anything left over from a previous
/// run), then polls for stale inflight mail and re-sends it. Newly enqueued
/// mail is expected to be handed to [`send_queued_mail`] directly by the
/// caller that accepted it (the server side), so this loop only needs to
/// recover from restarts and crashes.
pub async fn run<U, Stor, Transp>(storage: Arc<Stor>, transport: Arc<Transp>)
where
    U: 'static + Send + Sync,
    Stor: Storage<U>,
    Transp: Transport<U>,
{
    let mut queued = storage.list_queue().await;
    while let Some(next) = queued.next().await {
        match next {
            Ok(mail) => {
                smol::Task::spawn(send_queued_mail(storage.clone(), transport.clone(), mail))
                    .detach();
            }
            Err((e, id)) => warn!(?id, error = %e, "failed to list queued mail"),
        }
    }

    loop {
        smol::Timer::after(INFLIGHT_TIMEOUT).await;
        let mut inflight = storage.find_inflight().await;
        while let Some(next) = inflight.next().await {
            match next {
                Ok(mail) => {
                    let id = mail.id();
                    let storage = storage.clone();
                    let transport = transport.clone();
                    smol::Task::spawn(async move {
                        match storage.send_cancel(mail).await {
                            Ok(Some(queued)) => {
                                send_queued_mail(storage, transport, queued).await
                            }
                            Ok(None) => (),
                            Err((_, e)) => {
                                warn!(?id, error = %e, "failed to cancel stale inflight mail")
                            }
                        }
                    })
                    .detach();
                }
                Err((e, id)) => warn!(?id, error = %e, "failed to list inflight mail"),
            }
        }
    }
}
