use relay_message::Email;
use relay_queue_types::EnvelopeInfo;

/// Everything the queue needs to know about a single mail, besides its
/// content. `envelope` carries the fields a file-based store persists as
/// `X-MailRelay-*` header lines; `U` is the caller-supplied per-mail user
/// data (account selector, auth context, etc.) that storage backends
/// persist opaquely alongside it.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct MailMetadata<U> {
    pub from: Option<Email>,
    pub to: Vec<Email>,
    pub envelope: EnvelopeInfo,
    pub metadata: U,
}
