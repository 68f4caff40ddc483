//! Split-by-domain filter: groups a mail's remote recipients by domain and
//! plans one derived message per extra domain, each hardlinked to the
//! original content with its own envelope and narrowed recipient list.
//!
//! This module only computes the plan (which domains, which recipients,
//! which new ids go where); performing the hardlink/write is storage-
//! specific and left to the caller, the same way the filter only edits
//! envelopes and leaves file I/O to the store in the original design.

use relay_queue_types::QueueId;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SplitGroup {
    pub domain: String,
    pub recipients: Vec<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SplitPlan {
    /// The group kept under the original message id.
    pub original: SplitGroup,
    /// Additional groups, each needing a freshly allocated id.
    pub extra: Vec<SplitGroup>,
}

/// Lowercases `domain` unless `raw` (case-sensitive domain matching) was
/// requested.
fn normalise(domain: &str, raw: bool) -> String {
    if raw {
        domain.to_string()
    } else {
        domain.to_lowercase()
    }
}

fn domain_of(recipient: &str) -> &str {
    recipient.rsplit('@').next().unwrap_or(recipient)
}

/// Groups `to_remote` by domain (case-insensitively unless `raw`), in
/// sorted domain order. Returns `None` when there is nothing to split
/// (no remote recipients).
pub fn plan(to_remote: &[String], raw: bool) -> Option<SplitPlan> {
    let mut domains: Vec<String> = to_remote
        .iter()
        .map(|r| normalise(domain_of(r), raw))
        .collect();
    domains.sort();
    domains.dedup();
    if domains.is_empty() {
        return None;
    }

    let groups: Vec<SplitGroup> = domains
        .into_iter()
        .map(|domain| {
            let recipients = to_remote
                .iter()
                .filter(|r| normalise(domain_of(r), raw) == domain)
                .cloned()
                .collect();
            SplitGroup { domain, recipients }
        })
        .collect();

    let mut groups = groups.into_iter();
    let original = groups.next().expect("domains is non-empty");
    let extra = groups.collect();
    Some(SplitPlan { original, extra })
}

/// `user@example.com` (optionally with an overriding port) -> the
/// `forward-to` value for a group's first recipient: `example.com` or
/// `example.com:<port>`.
pub fn forward_to(recipient: &str, port: Option<u16>) -> String {
    let domain = domain_of(recipient);
    match port {
        Some(port) => format!("{}:{}", domain, port),
        None => domain.to_string(),
    }
}

/// Allocates fresh ids for a plan's extra groups, pairing each with the id
/// it should be stored under.
pub fn allocate_ids(plan: &SplitPlan, mut new_id: impl FnMut() -> QueueId) -> Vec<QueueId> {
    plan.extra.iter().map(|_| new_id()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_recipients_means_no_plan() {
        assert!(plan(&[], false).is_none());
    }

    #[test]
    fn single_domain_has_no_extra_groups() {
        let p = plan(
            &["a@example.com".to_string(), "b@example.com".to_string()],
            false,
        )
        .unwrap();
        assert_eq!(p.original.domain, "example.com");
        assert_eq!(p.original.recipients.len(), 2);
        assert!(p.extra.is_empty());
    }

    #[test]
    fn multiple_domains_split_in_sorted_order() {
        let p = plan(
            &[
                "a@zzz.example".to_string(),
                "b@aaa.example".to_string(),
                "c@aaa.example".to_string(),
            ],
            false,
        )
        .unwrap();
        assert_eq!(p.original.domain, "aaa.example");
        assert_eq!(p.original.recipients.len(), 2);
        assert_eq!(p.extra.len(), 1);
        assert_eq!(p.extra[0].domain, "zzz.example");
    }

    #[test]
    fn case_insensitive_by_default() {
        let p = plan(
            &["a@Example.com".to_string(), "b@example.com".to_string()],
            false,
        )
        .unwrap();
        assert_eq!(p.original.recipients.len(), 2);
        assert!(p.extra.is_empty());
    }

    #[test]
    fn raw_mode_is_case_sensitive() {
        let p = plan(
            &["a@Example.com".to_string(), "b@example.com".to_string()],
            true,
        )
        .unwrap();
        assert_eq!(p.extra.len(), 1);
    }

    #[test]
    fn forward_to_uses_recipient_domain() {
        assert_eq!(forward_to("a@example.com", None), "example.com");
        assert_eq!(forward_to("a@example.com", Some(2525)), "example.com:2525");
    }
}
