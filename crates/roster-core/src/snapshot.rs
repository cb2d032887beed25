//! # Roster Store
//!
//! The in-memory roster snapshot and the server fragments folded into it.
//!
//! ## Merge Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Snapshot Merge                                  │
//! │                                                                         │
//! │   Backend response                                                      │
//! │   ┌──────────────────────┐     ┌──────────────────────┐                │
//! │   │ MembershipFragment   │     │ AddressBookFragment  │                │
//! │   │  members[role, del]  │     │  contacts, groups    │                │
//! │   │  last_change         │     │  owner properties    │                │
//! │   └──────────┬───────────┘     │  last_change (x2)    │                │
//! │              │                 └──────────┬───────────┘                │
//! │              └────────────┬───────────────┘                            │
//! │                           ▼                                             │
//! │   ┌──────────────────────────────────────────────────────────────┐     │
//! │   │                 RosterSnapshot::merge                        │     │
//! │   │                                                              │     │
//! │   │  contacts:  hash ──► Contact   (upsert by key, never append) │     │
//! │   │  groups:    id   ──► name                                    │     │
//! │   │  markers:   max(current, fragment)  (never regress)          │     │
//! │   └──────────────────────────┬───────────────────────────────────┘     │
//! │                              ▼                                          │
//! │                   Vec<RosterChange>  (diff of list bits)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Merging the same fragment twice leaves the snapshot unchanged and the
//! second merge reports no changes.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::MembershipTarget;
use crate::types::{contact_key, ClientType, Contact, MemberRole, MembershipList, MembershipSet};
use crate::SNAPSHOT_SCHEMA_VERSION;

// =============================================================================
// Version Marker
// =============================================================================

/// Server-side last-change timestamp.
///
/// `VersionMarker::NEVER` means no fetch has completed yet, which forces a
/// full (non-incremental) fetch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VersionMarker(Option<DateTime<Utc>>);

impl VersionMarker {
    pub const NEVER: VersionMarker = VersionMarker(None);

    pub const fn at(timestamp: DateTime<Utc>) -> Self {
        VersionMarker(Some(timestamp))
    }

    #[inline]
    pub const fn is_never(&self) -> bool {
        self.0.is_none()
    }

    pub const fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.0
    }

    /// Moves the marker forward to `other` if it is newer. Returns `true`
    /// if it moved.
    pub fn advance(&mut self, other: VersionMarker) -> bool {
        if other > *self {
            *self = other;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Server Fragments
// =============================================================================

/// One membership record from the sharing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub account: String,
    pub client_type: ClientType,
    pub role: MemberRole,
    /// Identifier of this membership, used to delete it later.
    pub membership_id: Option<String>,
    /// The membership was removed since the requested marker.
    #[serde(default)]
    pub deleted: bool,
}

/// Membership-fetch response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MembershipFragment {
    pub members: Vec<MemberEntry>,
    pub last_change: VersionMarker,
}

/// One contact record from the address book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBookContact {
    pub id: Uuid,
    pub account: String,
    pub client_type: ClientType,
    pub display_name: Option<String>,
    /// Messenger users are on the owner's Forward list.
    pub is_messenger_user: bool,
    #[serde(default)]
    pub group_ids: Vec<Uuid>,
    #[serde(default)]
    pub deleted: bool,
}

/// One group record from the address book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
}

/// Address-book-fetch response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressBookFragment {
    pub contacts: Vec<AddressBookContact>,
    pub groups: Vec<GroupEntry>,
    pub owner_properties: BTreeMap<String, String>,
    pub last_change: VersionMarker,
    pub dynamic_item_last_change: VersionMarker,
}

/// A raw incremental server response, as kept in the delta log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fragment", rename_all = "snake_case")]
pub enum ServerFragment {
    Membership(MembershipFragment),
    AddressBook(AddressBookFragment),
}

impl ServerFragment {
    /// Short name used as the persisted fragment kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            ServerFragment::Membership(_) => "membership",
            ServerFragment::AddressBook(_) => "address_book",
        }
    }
}

// =============================================================================
// Roster Changes
// =============================================================================

/// What a merge changed, for notification purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    ContactAdded { key: String, list: MembershipList },
    ContactRemoved { key: String, list: MembershipList },
    ReverseAdded { key: String },
    ReverseRemoved { key: String },
    GroupAdded { id: Uuid, name: String },
    GroupRemoved { id: Uuid, name: String },
}

/// Remembers each touched contact's lists before a merge so the reported
/// changes are the net effect of the whole fragment.
#[derive(Default)]
struct ChangeTracker {
    seen: HashSet<String>,
    before: Vec<(String, MembershipSet)>,
}

impl ChangeTracker {
    fn touch(&mut self, key: &str, lists: MembershipSet) {
        if self.seen.insert(key.to_string()) {
            self.before.push((key.to_string(), lists));
        }
    }

    fn finish(self, contacts: &HashMap<String, Contact>, out: &mut Vec<RosterChange>) {
        for (key, before) in self.before {
            let after = contacts.get(&key).map(|c| c.lists).unwrap_or_default();
            for list in before.difference(after) {
                out.push(RosterChange::ContactRemoved { key: key.clone(), list });
                if list == MembershipList::Reverse {
                    out.push(RosterChange::ReverseRemoved { key: key.clone() });
                }
            }
            for list in after.difference(before) {
                out.push(RosterChange::ContactAdded { key: key.clone(), list });
                if list == MembershipList::Reverse {
                    out.push(RosterChange::ReverseAdded { key: key.clone() });
                }
            }
        }
    }
}

// =============================================================================
// Roster Snapshot
// =============================================================================

/// Local roster state for one signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub schema_version: u32,
    pub contacts: HashMap<String, Contact>,
    pub groups: HashMap<Uuid, String>,
    pub owner_properties: BTreeMap<String, String>,
    pub membership_last_change: VersionMarker,
    pub address_book_last_change: VersionMarker,
    pub dynamic_item_last_change: VersionMarker,
}

impl Default for RosterSnapshot {
    fn default() -> Self {
        RosterSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            contacts: HashMap::new(),
            groups: HashMap::new(),
            owner_properties: BTreeMap::new(),
            membership_last_change: VersionMarker::NEVER,
            address_book_last_change: VersionMarker::NEVER,
            dynamic_item_last_change: VersionMarker::NEVER,
        }
    }
}

impl RosterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a contact by account and type.
    pub fn contact(&self, account: &str, client_type: ClientType) -> Option<&Contact> {
        self.contacts.get(&contact_key(account, client_type))
    }

    pub fn contact_mut(&mut self, account: &str, client_type: ClientType) -> Option<&mut Contact> {
        self.contacts.get_mut(&contact_key(account, client_type))
    }

    /// Returns the contact, inserting an unregistered one if absent.
    pub fn contact_entry(&mut self, account: &str, client_type: ClientType) -> &mut Contact {
        self.contacts
            .entry(contact_key(account, client_type))
            .or_insert_with(|| Contact::new(account, client_type))
    }

    /// Number of contacts in the given group.
    pub fn group_size(&self, group_id: Uuid) -> usize {
        self.contacts
            .values()
            .filter(|c| c.groups.contains(&group_id))
            .count()
    }

    /// Folds a server fragment into the snapshot.
    pub fn merge(&mut self, fragment: &ServerFragment) -> Vec<RosterChange> {
        match fragment {
            ServerFragment::Membership(f) => self.merge_membership(f),
            ServerFragment::AddressBook(f) => self.merge_address_book(f),
        }
    }

    /// Folds every fragment in order.
    pub fn merge_all<'a>(
        &mut self,
        fragments: impl IntoIterator<Item = &'a ServerFragment>,
    ) -> Vec<RosterChange> {
        fragments
            .into_iter()
            .flat_map(|f| self.merge(f))
            .collect()
    }

    fn merge_membership(&mut self, fragment: &MembershipFragment) -> Vec<RosterChange> {
        let mut tracker = ChangeTracker::default();

        for member in &fragment.members {
            let key = contact_key(&member.account, member.client_type);
            let list = member.role.list();

            if member.deleted {
                let Some(contact) = self.contacts.get_mut(&key) else {
                    continue;
                };
                tracker.touch(&key, contact.lists);
                contact.lists.remove(list);
                contact.membership_ids.remove(&member.role);
                if contact.is_orphaned() {
                    self.contacts.remove(&key);
                }
                continue;
            }

            let contact = self
                .contacts
                .entry(key.clone())
                .or_insert_with(|| Contact::new(member.account.as_str(), member.client_type));
            tracker.touch(&key, contact.lists);
            contact.lists.insert(list);
            if let Some(id) = &member.membership_id {
                contact.membership_ids.insert(member.role, id.clone());
            }
        }

        self.membership_last_change.advance(fragment.last_change);

        let mut changes = Vec::new();
        tracker.finish(&self.contacts, &mut changes);
        changes
    }

    fn merge_address_book(&mut self, fragment: &AddressBookFragment) -> Vec<RosterChange> {
        let mut changes = Vec::new();

        for group in &fragment.groups {
            if group.deleted {
                if let Some(name) = self.groups.remove(&group.id) {
                    for contact in self.contacts.values_mut() {
                        contact.groups.remove(&group.id);
                    }
                    changes.push(RosterChange::GroupRemoved { id: group.id, name });
                }
            } else if self.groups.insert(group.id, group.name.clone()).is_none() {
                changes.push(RosterChange::GroupAdded {
                    id: group.id,
                    name: group.name.clone(),
                });
            }
        }

        let mut tracker = ChangeTracker::default();
        for entry in &fragment.contacts {
            let key = contact_key(&entry.account, entry.client_type);

            if entry.deleted {
                let Some(contact) = self.contacts.get_mut(&key) else {
                    continue;
                };
                tracker.touch(&key, contact.lists);
                contact.lists.remove(MembershipList::Forward);
                contact.id = None;
                contact.groups.clear();
                if contact.is_orphaned() {
                    self.contacts.remove(&key);
                }
                continue;
            }

            let contact = self
                .contacts
                .entry(key.clone())
                .or_insert_with(|| Contact::new(entry.account.as_str(), entry.client_type));
            tracker.touch(&key, contact.lists);
            contact.id = Some(entry.id);
            if entry.display_name.is_some() {
                contact.display_name = entry.display_name.clone();
            }
            contact.groups = entry
                .group_ids
                .iter()
                .filter(|id| self.groups.contains_key(id))
                .copied()
                .collect();
            if entry.is_messenger_user {
                contact.lists.insert(MembershipList::Forward);
            } else {
                contact.lists.remove(MembershipList::Forward);
            }
        }
        tracker.finish(&self.contacts, &mut changes);

        for (name, value) in &fragment.owner_properties {
            self.owner_properties.insert(name.clone(), value.clone());
        }

        self.address_book_last_change.advance(fragment.last_change);
        self.dynamic_item_last_change
            .advance(fragment.dynamic_item_last_change);
        changes
    }

    // -------------------------------------------------------------------------
    // Derived views
    // -------------------------------------------------------------------------

    /// Forward/Allowed/Blocked targets for the initial bulk membership
    /// command. Contacts on none of the three are left out.
    pub fn bulk_targets(&self) -> Vec<MembershipTarget> {
        self.contacts
            .values()
            .filter_map(|contact| {
                let mut lists = MembershipSet::empty();
                if contact.is_on(MembershipList::Forward) {
                    lists.insert(MembershipList::Forward);
                }
                if contact.is_on(MembershipList::Allowed) {
                    lists.insert(MembershipList::Allowed);
                } else if contact.is_on(MembershipList::Blocked) {
                    lists.insert(MembershipList::Blocked);
                }
                (!lists.is_empty()).then(|| MembershipTarget {
                    account: contact.account.clone(),
                    client_type: contact.client_type,
                    lists,
                })
            })
            .collect()
    }

    /// Keys of contacts whose only relationship is an unanswered inbound one.
    pub fn awaiting_decision(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .contacts
            .iter()
            .filter(|(_, c)| c.awaits_owner_decision())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> VersionMarker {
        VersionMarker::at(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn member(account: &str, role: MemberRole) -> MemberEntry {
        MemberEntry {
            account: account.to_string(),
            client_type: ClientType::Passport,
            role,
            membership_id: Some(format!("{}-{}", role, account)),
            deleted: false,
        }
    }

    fn membership(members: Vec<MemberEntry>, at: i64) -> ServerFragment {
        ServerFragment::Membership(MembershipFragment {
            members,
            last_change: ts(at),
        })
    }

    fn ab_contact(account: &str, messenger: bool, groups: Vec<Uuid>) -> AddressBookContact {
        AddressBookContact {
            id: Uuid::new_v4(),
            account: account.to_string(),
            client_type: ClientType::Passport,
            display_name: Some(account.to_uppercase()),
            is_messenger_user: messenger,
            group_ids: groups,
            deleted: false,
        }
    }

    #[test]
    fn test_version_marker_never_regresses() {
        let mut marker = VersionMarker::NEVER;
        assert!(marker.is_never());
        assert!(marker.advance(ts(100)));
        assert!(!marker.advance(ts(50)));
        assert!(!marker.advance(VersionMarker::NEVER));
        assert_eq!(marker, ts(100));
    }

    #[test]
    fn test_membership_merge_adds_contacts() {
        let mut snapshot = RosterSnapshot::new();
        let changes = snapshot.merge(&membership(
            vec![
                member("a@example.com", MemberRole::Allow),
                member("b@example.com", MemberRole::Reverse),
            ],
            10,
        ));

        let a = snapshot.contact("a@example.com", ClientType::Passport).unwrap();
        assert!(a.is_on(MembershipList::Allowed));
        assert_eq!(
            a.membership_ids.get(&MemberRole::Allow).map(String::as_str),
            Some("Allow-a@example.com")
        );
        assert!(changes.contains(&RosterChange::ReverseAdded {
            key: "b@example.com:Passport".to_string()
        }));
        assert_eq!(snapshot.membership_last_change, ts(10));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let group = Uuid::new_v4();
        let fragments = vec![
            membership(
                vec![
                    member("a@example.com", MemberRole::Allow),
                    member("a@example.com", MemberRole::Block),
                    member("c@example.com", MemberRole::Pending),
                ],
                10,
            ),
            ServerFragment::AddressBook(AddressBookFragment {
                contacts: vec![ab_contact("a@example.com", true, vec![group])],
                groups: vec![GroupEntry {
                    id: group,
                    name: "Friends".to_string(),
                    deleted: false,
                }],
                owner_properties: [("blp".to_string(), "1".to_string())].into(),
                last_change: ts(20),
                dynamic_item_last_change: ts(21),
            }),
        ];

        for fragment in &fragments {
            let mut once = RosterSnapshot::new();
            once.merge(fragment);

            let mut twice = once.clone();
            let changes = twice.merge(fragment);

            assert_eq!(once, twice);
            assert!(changes.is_empty());
        }
    }

    #[test]
    fn test_merge_keeps_allowed_blocked_exclusive() {
        let mut snapshot = RosterSnapshot::new();
        snapshot.merge(&membership(
            vec![
                member("a@example.com", MemberRole::Allow),
                member("a@example.com", MemberRole::Block),
            ],
            10,
        ));
        let a = snapshot.contact("a@example.com", ClientType::Passport).unwrap();
        assert!(a.is_on(MembershipList::Blocked));
        assert!(!a.is_on(MembershipList::Allowed));
    }

    #[test]
    fn test_deleted_membership_removes_list() {
        let mut snapshot = RosterSnapshot::new();
        snapshot.merge(&membership(vec![member("a@example.com", MemberRole::Allow)], 10));

        let mut removal = member("a@example.com", MemberRole::Allow);
        removal.deleted = true;
        let changes = snapshot.merge(&membership(vec![removal], 20));

        assert_eq!(
            changes,
            vec![RosterChange::ContactRemoved {
                key: "a@example.com:Passport".to_string(),
                list: MembershipList::Allowed,
            }]
        );
        // Nothing left and never registered in the address book
        assert!(snapshot.contact("a@example.com", ClientType::Passport).is_none());
    }

    #[test]
    fn test_address_book_promotes_pending_to_forward() {
        let mut snapshot = RosterSnapshot::new();
        snapshot.merge(&membership(vec![member("p@example.com", MemberRole::Pending)], 10));
        assert_eq!(snapshot.awaiting_decision(), vec!["p@example.com:Passport".to_string()]);

        snapshot.merge(&ServerFragment::AddressBook(AddressBookFragment {
            contacts: vec![ab_contact("p@example.com", true, vec![])],
            ..Default::default()
        }));

        let p = snapshot.contact("p@example.com", ClientType::Passport).unwrap();
        assert!(p.is_on(MembershipList::Forward));
        assert!(!p.is_on(MembershipList::Pending));
        assert!(p.id.is_some());
        assert!(snapshot.awaiting_decision().is_empty());
    }

    #[test]
    fn test_group_delete_clears_membership() {
        let group = Uuid::new_v4();
        let mut snapshot = RosterSnapshot::new();
        snapshot.merge(&ServerFragment::AddressBook(AddressBookFragment {
            contacts: vec![ab_contact("a@example.com", true, vec![group])],
            groups: vec![GroupEntry {
                id: group,
                name: "Work".to_string(),
                deleted: false,
            }],
            ..Default::default()
        }));
        assert_eq!(snapshot.group_size(group), 1);

        let changes = snapshot.merge(&ServerFragment::AddressBook(AddressBookFragment {
            groups: vec![GroupEntry {
                id: group,
                name: "Work".to_string(),
                deleted: true,
            }],
            ..Default::default()
        }));
        assert_eq!(
            changes,
            vec![RosterChange::GroupRemoved {
                id: group,
                name: "Work".to_string()
            }]
        );
        assert_eq!(snapshot.group_size(group), 0);
    }

    #[test]
    fn test_markers_do_not_regress_on_older_fragment() {
        let mut snapshot = RosterSnapshot::new();
        snapshot.merge(&membership(vec![], 100));
        snapshot.merge(&membership(vec![], 50));
        assert_eq!(snapshot.membership_last_change, ts(100));
    }

    #[test]
    fn test_bulk_targets() {
        let mut snapshot = RosterSnapshot::new();
        snapshot.merge(&membership(
            vec![
                member("allowed@example.com", MemberRole::Allow),
                member("blocked@example.com", MemberRole::Block),
                member("reverse@example.com", MemberRole::Reverse),
            ],
            10,
        ));

        let mut targets = snapshot.bulk_targets();
        targets.sort_by(|a, b| a.account.cmp(&b.account));

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].account, "allowed@example.com");
        assert_eq!(targets[0].lists.bits(), MembershipList::Allowed.bit());
        assert_eq!(targets[1].account, "blocked@example.com");
        assert_eq!(targets[1].lists.bits(), MembershipList::Blocked.bit());
    }

    #[test]
    fn test_snapshot_serde() {
        let mut snapshot = RosterSnapshot::new();
        snapshot.merge(&membership(vec![member("a@example.com", MemberRole::Allow)], 10));
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: RosterSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
