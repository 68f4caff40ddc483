use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    storage::{InflightMail as _, QueuedMail as _, Storage},
    transport::{Transport, TransportError},
};

/// Moves a single queued mail through Locked (inflight) and either hands it
/// to the transport or puts it back in the queue for a later retry.
pub async fn send_queued_mail<U, Stor, Transp>(
    storage: Arc<Stor>,
    transport: Arc<Transp>,
    mail: Stor::QueuedMail,
) where
    U: 'static + Send + Sync,
    Stor: Storage<U>,
    Transp: Transport<U>,
{
    let id = mail.id();
    let inflight = match storage.send_start(mail).await {
        Ok(Some(inflight)) => inflight,
        Ok(None) => return,
        Err((_mail, e)) => {
            warn!(?id, error = %e, "failed to lock mail for sending");
            return;
        }
    };

    let (meta, reader) = match storage.read_inflight(&inflight).await {
        Ok(r) => r,
        Err(e) => {
            warn!(?id, error = %e, "failed to read inflight mail");
            let _ = storage.send_cancel(inflight).await;
            return;
        }
    };

    match transport.send(&meta, reader).await {
        Ok(()) => {
            debug!(?id, "mail delivered");
            if let Err((_, e)) = storage.send_done(inflight).await {
                warn!(?id, error = %e, "failed to mark mail as done after delivery");
            }
        }
        Err(TransportError::Permanent(reply)) => {
            warn!(?id, ?reply, "mail permanently rejected, dropping");
            let _ = storage.send_done(inflight).await;
        }
        Err(e) => {
            warn!(?id, error = %e, "transient delivery failure, rescheduling");
            if let Ok(Some(mut queued)) = storage.send_cancel(inflight).await {
                let retry_at = Utc::now() + chrono::Duration::minutes(15);
                let _ = storage
                    .reschedule(&mut queued, retry_at, Some(Utc::now()))
                    .await;
            }
        }
    }
}
