//! Post-acceptance filters that inspect or rewrite a queued mail before it
//! is forwarded: routing (MX resolution), split-by-domain, and an
//! external spam-scanner client.
//!
//! Each filter here is deliberately storage-agnostic: it works on the
//! pieces (`EnvelopeInfo`, recipient lists, content streams) rather than
//! reaching back into a particular `Storage` impl, since the queue crate
//! already abstracts over storage backends and a filter shouldn't need to
//! know which one is in use.

pub mod routing;
pub mod spam;
pub mod split;

pub use routing::{parse_forward_to, resolve as resolve_forward_to, ForwardTo};
pub use spam::{scan as spam_scan, Config as SpamConfig, ScanResult as SpamResult};
pub use split::{plan as split_plan, SplitGroup, SplitPlan};
