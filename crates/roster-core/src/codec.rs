//! # Membership Codec
//!
//! Encodes per-contact list membership into the compact document carried by
//! the `ADL`/`RML` live-connection commands.
//!
//! ## Payload Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Membership Payload                                  │
//! │                                                                         │
//! │  <ml l="1">                         ← l="1" only on the initial bulk   │
//! │    <d n="example.com">              ← one group per domain             │
//! │      <c n="alice" l="3" t="1" />    ← local part, list bits, type tag  │
//! │      <c n="bob" l="1" t="1" />                                         │
//! │    </d>                                                                 │
//! │    <t>                              ← phone accounts                   │
//! │      <c n="tel:+15551234" l="1" t="4" />                               │
//! │    </t>                                                                 │
//! │  </ml>                                                                  │
//! │                                                                         │
//! │  Each document ≤ MAX_PAYLOAD_BYTES. A group split across a boundary    │
//! │  is reopened at the start of the next document.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are ordered by a case-insensitive comparison of the domain (or
//! the full number for phones), so the same input always yields the same
//! command sequence.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{ClientType, Contact, MembershipSet};
use crate::validation::split_account;

/// Upper bound on the serialized size of one payload, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 7300;

/// A contact and the lists a command should carry for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipTarget {
    pub account: String,
    pub client_type: ClientType,
    pub lists: MembershipSet,
}

impl MembershipTarget {
    pub fn new(account: impl Into<String>, client_type: ClientType, lists: MembershipSet) -> Self {
        MembershipTarget {
            account: account.into(),
            client_type,
            lists,
        }
    }

    /// Target carrying the contact's current lists.
    pub fn from_contact(contact: &Contact) -> Self {
        MembershipTarget::new(contact.account.clone(), contact.client_type, contact.lists)
    }
}

/// Group a contact element belongs to. `None` is the phone group.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupKey(Option<String>);

impl GroupKey {
    fn open_tag(&self) -> String {
        match &self.0 {
            Some(domain) => format!("<d n=\"{}\">", escape(domain)),
            None => "<t>".to_string(),
        }
    }

    fn close_tag(&self) -> &'static str {
        match self.0 {
            Some(_) => "</d>",
            None => "</t>",
        }
    }
}

struct Entry {
    sort_key: String,
    group: GroupKey,
    element: String,
}

// =============================================================================
// Document Builder
// =============================================================================

struct DocumentBuilder {
    header: &'static str,
    payloads: Vec<String>,
    body: String,
    open: Option<GroupKey>,
    entries_in_doc: usize,
}

impl DocumentBuilder {
    const FOOTER: &'static str = "</ml>";

    fn header(initial: bool) -> &'static str {
        if initial {
            "<ml l=\"1\">"
        } else {
            "<ml>"
        }
    }

    fn new(initial: bool) -> Self {
        DocumentBuilder {
            header: Self::header(initial),
            payloads: Vec::new(),
            body: String::new(),
            open: None,
            entries_in_doc: 0,
        }
    }

    /// Size the document would have if closed now.
    fn closed_len(&self) -> usize {
        let close = self.open.as_ref().map(|g| g.close_tag().len()).unwrap_or(0);
        self.header.len() + self.body.len() + close + Self::FOOTER.len()
    }

    /// Bytes `entry` adds to the closed document.
    fn cost(&self, entry: &Entry) -> usize {
        match &self.open {
            Some(open) if *open == entry.group => entry.element.len(),
            _ => entry.group.open_tag().len() + entry.element.len() + entry.group.close_tag().len(),
        }
    }

    fn push(&mut self, entry: Entry) {
        if self.entries_in_doc > 0 && self.closed_len() + self.cost(&entry) > MAX_PAYLOAD_BYTES {
            self.flush();
        }

        if self.open.as_ref() != Some(&entry.group) {
            if let Some(open) = self.open.take() {
                self.body.push_str(open.close_tag());
            }
            self.body.push_str(&entry.group.open_tag());
            self.open = Some(entry.group);
        }
        self.body.push_str(&entry.element);
        self.entries_in_doc += 1;
    }

    fn flush(&mut self) {
        if let Some(open) = self.open.take() {
            self.body.push_str(open.close_tag());
        }
        let mut doc = String::with_capacity(self.header.len() + self.body.len() + 5);
        doc.push_str(self.header);
        doc.push_str(&self.body);
        doc.push_str(Self::FOOTER);
        self.payloads.push(doc);
        self.body.clear();
        self.entries_in_doc = 0;
    }

    fn finish(mut self) -> Vec<String> {
        if self.entries_in_doc > 0 || self.payloads.is_empty() {
            self.flush();
        }
        self.payloads
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encodes targets into one or more membership payloads.
///
/// Targets with an empty list set are skipped. Zero targets yield exactly
/// one empty document. Fails if any account is malformed or too long to
/// fit in a payload of its own.
///
/// ## Example
/// ```rust
/// use roster_core::codec::{encode_memberships, MembershipTarget};
/// use roster_core::{ClientType, MembershipList, MembershipSet};
///
/// let lists: MembershipSet = [MembershipList::Forward, MembershipList::Allowed]
///     .into_iter()
///     .collect();
/// let target = MembershipTarget::new("alice@example.com", ClientType::Passport, lists);
///
/// let payloads = encode_memberships(&[target], true).unwrap();
/// assert_eq!(
///     payloads,
///     vec![r#"<ml l="1"><d n="example.com"><c n="alice" l="3" t="1" /></d></ml>"#.to_string()]
/// );
/// ```
pub fn encode_memberships(targets: &[MembershipTarget], initial: bool) -> CoreResult<Vec<String>> {
    let entries = targets
        .iter()
        .filter(|t| !t.lists.is_empty())
        .map(|t| encode_entry(t, initial))
        .collect::<CoreResult<Vec<_>>>()?;
    Ok(build(entries, initial))
}

/// Payloads for a bulk list, plus the targets that could not be encoded.
#[derive(Debug)]
pub struct BulkEncoding {
    pub payloads: Vec<String>,
    pub skipped: Vec<(MembershipTarget, CoreError)>,
}

/// Encodes server-sourced targets, setting aside any that cannot be
/// encoded instead of failing the whole batch.
pub fn encode_bulk(targets: &[MembershipTarget], initial: bool) -> BulkEncoding {
    let mut entries = Vec::with_capacity(targets.len());
    let mut skipped = Vec::new();

    for target in targets.iter().filter(|t| !t.lists.is_empty()) {
        match encode_entry(target, initial) {
            Ok(entry) => entries.push(entry),
            Err(err) => skipped.push((target.clone(), err)),
        }
    }

    BulkEncoding {
        payloads: build(entries, initial),
        skipped,
    }
}

fn encode_entry(target: &MembershipTarget, initial: bool) -> CoreResult<Entry> {
    let parts = split_account(&target.account, target.client_type)?;
    let (sort_key, group, name) = match parts.domain {
        Some(domain) => (domain.clone(), GroupKey(Some(domain)), parts.local),
        None => (
            parts.local.to_lowercase(),
            GroupKey(None),
            format!("tel:{}", parts.local),
        ),
    };
    let element = format!(
        "<c n=\"{}\" l=\"{}\" t=\"{}\" />",
        escape(&name),
        target.lists.bits(),
        target.client_type.tag()
    );

    // Smallest document that can carry it: header, own group, footer
    let size = DocumentBuilder::header(initial).len()
        + group.open_tag().len()
        + element.len()
        + group.close_tag().len()
        + DocumentBuilder::FOOTER.len();
    if size > MAX_PAYLOAD_BYTES {
        return Err(CoreError::PayloadTooLarge {
            account: target.account.clone(),
            size,
        });
    }

    Ok(Entry {
        sort_key,
        group,
        element,
    })
}

fn build(mut entries: Vec<Entry>, initial: bool) -> Vec<String> {
    // Stable: contacts within a domain keep their input order
    entries.sort_by(|a, b| a.sort_key.cmp(&b.sort_key));

    let mut builder = DocumentBuilder::new(initial);
    for entry in entries {
        builder.push(entry);
    }
    builder.finish()
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MembershipList;

    fn set(lists: &[MembershipList]) -> MembershipSet {
        lists.iter().copied().collect()
    }

    fn passport(account: &str, lists: &[MembershipList]) -> MembershipTarget {
        MembershipTarget::new(account, ClientType::Passport, set(lists))
    }

    #[test]
    fn test_empty_input_yields_one_payload() {
        assert_eq!(encode_memberships(&[], true).unwrap(), vec!["<ml l=\"1\"></ml>".to_string()]);
        assert_eq!(encode_memberships(&[], false).unwrap(), vec!["<ml></ml>".to_string()]);
    }

    #[test]
    fn test_targets_without_lists_are_skipped() {
        let targets = vec![passport("a@example.com", &[])];
        assert_eq!(encode_memberships(&targets, false).unwrap(), vec!["<ml></ml>".to_string()]);
    }

    #[test]
    fn test_groups_by_domain_case_insensitive() {
        let targets = vec![
            passport("zed@Zulu.org", &[MembershipList::Forward]),
            passport("amy@alpha.com", &[MembershipList::Allowed]),
            passport("ben@ALPHA.com", &[MembershipList::Blocked]),
        ];

        let payloads = encode_memberships(&targets, false).unwrap();
        assert_eq!(
            payloads,
            vec![concat!(
                "<ml>",
                "<d n=\"alpha.com\"><c n=\"amy\" l=\"2\" t=\"1\" /><c n=\"ben\" l=\"4\" t=\"1\" /></d>",
                "<d n=\"zulu.org\"><c n=\"zed\" l=\"1\" t=\"1\" /></d>",
                "</ml>"
            )
            .to_string()]
        );
    }

    #[test]
    fn test_phone_contacts_form_own_group() {
        let targets = vec![
            MembershipTarget::new("+15550002", ClientType::Phone, set(&[MembershipList::Forward])),
            MembershipTarget::new("+15550001", ClientType::Phone, set(&[MembershipList::Allowed])),
            MembershipTarget::new(
                "carol@example.com",
                ClientType::Email,
                set(&[MembershipList::Forward]),
            ),
        ];

        let payloads = encode_memberships(&targets, true).unwrap();
        assert_eq!(payloads.len(), 1);
        let doc = &payloads[0];
        assert!(doc.contains(
            "<t><c n=\"tel:+15550001\" l=\"2\" t=\"4\" /><c n=\"tel:+15550002\" l=\"1\" t=\"4\" /></t>"
        ));
        assert!(doc.contains("<d n=\"example.com\"><c n=\"carol\" l=\"1\" t=\"32\" /></d>"));
    }

    #[test]
    fn test_output_independent_of_domain_order() {
        let mut targets: Vec<_> = (0..7)
            .map(|i| passport(&format!("user{}@domain{}.com", i, i), &[MembershipList::Forward]))
            .collect();
        let forward = encode_memberships(&targets, true).unwrap();
        targets.reverse();
        assert_eq!(encode_memberships(&targets, true).unwrap(), forward);
    }

    #[test]
    fn test_large_input_splits_under_threshold() {
        let targets: Vec<_> = (0..1000)
            .map(|i| {
                passport(
                    &format!("member.number.{:04}@domain{}.example.com", i, i % 13),
                    &[MembershipList::Forward, MembershipList::Allowed],
                )
            })
            .collect();

        let payloads = encode_memberships(&targets, true).unwrap();

        let serialized_size: usize = (0..1000)
            .map(|i| format!("<c n=\"member.number.{:04}\" l=\"3\" t=\"1\" />", i).len())
            .sum();
        let minimum = serialized_size.div_ceil(MAX_PAYLOAD_BYTES);

        assert!(payloads.len() >= minimum);
        for payload in &payloads {
            assert!(payload.len() <= MAX_PAYLOAD_BYTES, "payload of {} bytes", payload.len());
            assert!(payload.starts_with("<ml l=\"1\">"));
            assert!(payload.ends_with("</ml>"));
        }

        let total: usize = payloads.iter().map(|p| p.matches("<c ").count()).sum();
        assert_eq!(total, targets.len());
    }

    #[test]
    fn test_split_group_is_reopened() {
        let targets: Vec<_> = (0..400)
            .map(|i| passport(&format!("someone{:05}@same.example.com", i), &[MembershipList::Forward]))
            .collect();

        let payloads = encode_memberships(&targets, false).unwrap();
        assert!(payloads.len() > 1);
        for payload in &payloads {
            assert!(payload.starts_with("<ml><d n=\"same.example.com\">"));
            assert!(payload.ends_with("</d></ml>"));
        }
    }

    #[test]
    fn test_attribute_values_are_escaped() {
        let targets = vec![passport("o'neil&co@example.com", &[MembershipList::Forward])];
        let payloads = encode_memberships(&targets, false).unwrap();
        assert!(payloads[0].contains("n=\"o&apos;neil&amp;co\""));
    }

    #[test]
    fn test_malformed_account_is_rejected() {
        let targets = vec![passport("not-an-address", &[MembershipList::Forward])];
        assert!(encode_memberships(&targets, true).is_err());
    }

    #[test]
    fn test_element_larger_than_payload_is_rejected() {
        let account = format!("{}@example.com", "x".repeat(8000));
        let targets = vec![passport(&account, &[MembershipList::Forward])];

        assert!(matches!(
            encode_memberships(&targets, true),
            Err(CoreError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_bulk_sets_aside_unencodable_targets() {
        let oversized = format!("{}@example.com", "x".repeat(8000));
        let targets = vec![
            passport("friend@example.com", &[MembershipList::Allowed]),
            passport("admin@localhost", &[MembershipList::Allowed]),
            passport(&oversized, &[MembershipList::Forward]),
        ];

        let encoded = encode_bulk(&targets, true);

        assert_eq!(
            encoded.payloads,
            vec![r#"<ml l="1"><d n="example.com"><c n="friend" l="2" t="1" /></d></ml>"#.to_string()]
        );
        let skipped: Vec<_> = encoded.skipped.iter().map(|(t, _)| t.account.as_str()).collect();
        assert_eq!(skipped, vec!["admin@localhost", oversized.as_str()]);
        assert!(matches!(encoded.skipped[1].1, CoreError::PayloadTooLarge { .. }));
        for payload in &encoded.payloads {
            assert!(payload.len() <= MAX_PAYLOAD_BYTES);
        }
    }
}
