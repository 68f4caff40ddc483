use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, serde::Deserialize, serde::Serialize)]
pub struct ScheduleInfo {
    pub at: DateTime<Utc>,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl ScheduleInfo {
    pub fn last_interval(&self) -> Result<Option<Duration>, time::OutOfRangeError> {
        self.last_attempt
            .map(|last| (last - self.at).to_std())
            .transpose()
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct QueueId(pub Arc<String>);

impl QueueId {
    pub fn new<S: ToString>(s: S) -> QueueId {
        QueueId(Arc::new(s.to_string()))
    }
}

/// Content transfer encoding of a queued mail's body, as declared by the
/// client (`8BITMIME`/`BINARYMIME`) or assumed (`SevenBit`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum BodyType {
    SevenBit,
    EightBitMime,
    BinaryMime,
    Unknown,
}

impl BodyType {
    pub fn name(&self) -> &'static str {
        match self {
            BodyType::SevenBit => "7bit",
            BodyType::EightBitMime => "8bit",
            BodyType::BinaryMime => "binarymime",
            BodyType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> BodyType {
        match s {
            "7bit" => BodyType::SevenBit,
            "8bit" => BodyType::EightBitMime,
            "binarymime" => BodyType::BinaryMime,
            _ => BodyType::Unknown,
        }
    }
}

/// The envelope fields a store needs to persist beyond the mail's own
/// from/to/content, one per `X-MailRelay-*` header line.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct EnvelopeInfo {
    pub body_type: Option<BodyType>,
    pub authentication: String,
    pub client: String,
    pub client_certificate: String,
    pub mail_from_auth_in: String,
    pub mail_from_auth_out: String,
    pub forward_to: String,
    pub forward_to_address: String,
    pub client_account_selector: String,
    pub utf8_mailbox_names: bool,
}
