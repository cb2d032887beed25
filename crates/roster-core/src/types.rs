//! # Domain Types
//!
//! Core roster types used throughout the engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Roster Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Contact      │   │ MembershipSet   │   │  ContactGroup   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  account        │   │  Forward   = 1  │   │  id (GUID)      │       │
//! │  │  client_type    │   │  Allowed   = 2  │   │  name           │       │
//! │  │  id (nullable)  │   │  Blocked   = 4  │   └─────────────────┘       │
//! │  │  lists          │   │  Reverse   = 8  │                              │
//! │  │  groups         │   │  Pending   = 16 │   ┌─────────────────┐       │
//! │  │  membership_ids │   └─────────────────┘   │  OwnerSettings  │       │
//! │  └─────────────────┘                         │  blp / gtc      │       │
//! │                                              │  roaming / mpop │       │
//! │  ┌─────────────────┐   ┌─────────────────┐   └─────────────────┘       │
//! │  │   ClientType    │   │   MemberRole    │                              │
//! │  │  Passport  = 1  │   │  Allow          │                              │
//! │  │  Phone     = 4  │   │  Block          │                              │
//! │  │  Email     = 32 │   │  Reverse        │                              │
//! │  └─────────────────┘   │  Pending        │                              │
//! │                        └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Contact Identity
//! A contact is keyed by its hash `account:ClientType` (account lowercased).
//! The server-assigned GUID stays `None` until the address book knows the
//! contact.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

// =============================================================================
// Client Type
// =============================================================================

/// Kind of account a contact represents.
///
/// The numeric tag is what travels in the membership wire payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClientType {
    /// Native network account.
    Passport,
    /// Federated e-mail account.
    Email,
    /// Mobile phone number.
    Phone,
}

impl ClientType {
    /// Numeric tag used on the wire.
    pub const fn tag(&self) -> u32 {
        match self {
            ClientType::Passport => 1,
            ClientType::Phone => 4,
            ClientType::Email => 32,
        }
    }

    /// Parses a numeric wire tag.
    pub fn from_tag(tag: u32) -> Result<Self, CoreError> {
        match tag {
            1 => Ok(ClientType::Passport),
            4 => Ok(ClientType::Phone),
            32 => Ok(ClientType::Email),
            other => Err(CoreError::UnknownClientType(other)),
        }
    }

    /// Whether accounts of this type are phone numbers rather than
    /// `local@domain` addresses.
    pub const fn is_phone(&self) -> bool {
        matches!(self, ClientType::Phone)
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientType::Passport => "Passport",
            ClientType::Email => "Email",
            ClientType::Phone => "Phone",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Membership Lists
// =============================================================================

/// One relationship a contact can have with the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MembershipList {
    /// The owner has this contact on their contact list.
    Forward,
    /// The contact may see the owner's presence.
    Allowed,
    /// The contact is blocked.
    Blocked,
    /// The contact has the owner on their list (server-authoritative).
    Reverse,
    /// The contact added the owner and awaits a decision.
    Pending,
}

impl MembershipList {
    /// Every list, in bit order.
    pub const ALL: [MembershipList; 5] = [
        MembershipList::Forward,
        MembershipList::Allowed,
        MembershipList::Blocked,
        MembershipList::Reverse,
        MembershipList::Pending,
    ];

    /// Bit assigned to this list in a [`MembershipSet`].
    pub const fn bit(&self) -> u8 {
        match self {
            MembershipList::Forward => 1,
            MembershipList::Allowed => 2,
            MembershipList::Blocked => 4,
            MembershipList::Reverse => 8,
            MembershipList::Pending => 16,
        }
    }

    /// Parses a single list bit.
    pub fn from_bit(bit: u8) -> Result<Self, CoreError> {
        MembershipList::ALL
            .into_iter()
            .find(|list| list.bit() == bit)
            .ok_or(CoreError::UnknownListBit(bit))
    }

    /// Backend member role for this list. Forward has none: it lives only in
    /// the address book and on the live connection.
    pub const fn role(&self) -> Option<MemberRole> {
        match self {
            MembershipList::Forward => None,
            MembershipList::Allowed => Some(MemberRole::Allow),
            MembershipList::Blocked => Some(MemberRole::Block),
            MembershipList::Reverse => Some(MemberRole::Reverse),
            MembershipList::Pending => Some(MemberRole::Pending),
        }
    }

    /// The list that cannot coexist with this one, if any.
    pub const fn exclusive_with(&self) -> Option<MembershipList> {
        match self {
            MembershipList::Allowed => Some(MembershipList::Blocked),
            MembershipList::Blocked => Some(MembershipList::Allowed),
            _ => None,
        }
    }
}

impl fmt::Display for MembershipList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MembershipList::Forward => "Forward",
            MembershipList::Allowed => "Allowed",
            MembershipList::Blocked => "Blocked",
            MembershipList::Reverse => "Reverse",
            MembershipList::Pending => "Pending",
        };
        f.write_str(name)
    }
}

/// Bitset over the five membership lists.
///
/// ## Invariants
/// - Allowed and Blocked are never both set: inserting one clears the other.
/// - Pending is transitional: inserting Forward clears it, and Pending is
///   not accepted while Forward is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct MembershipSet(u8);

impl MembershipSet {
    const MASK: u8 = 0b1_1111;

    /// The empty set.
    pub const fn empty() -> Self {
        MembershipSet(0)
    }

    /// Builds a set from raw bits, dropping unknown bits and resolving an
    /// Allowed+Blocked conflict in favour of Blocked.
    pub fn from_bits(bits: u8) -> Self {
        let mut set = MembershipSet(bits & Self::MASK);
        if set.contains(MembershipList::Allowed) && set.contains(MembershipList::Blocked) {
            set.0 &= !MembershipList::Allowed.bit();
        }
        if set.contains(MembershipList::Forward) {
            set.0 &= !MembershipList::Pending.bit();
        }
        set
    }

    /// Raw bit value, as sent on the wire.
    #[inline]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(&self, list: MembershipList) -> bool {
        self.0 & list.bit() != 0
    }

    /// Adds a list, enforcing the set invariants. Returns `true` if the set
    /// changed.
    pub fn insert(&mut self, list: MembershipList) -> bool {
        let before = self.0;
        match list {
            MembershipList::Pending if self.contains(MembershipList::Forward) => return false,
            MembershipList::Forward => self.0 &= !MembershipList::Pending.bit(),
            _ => {}
        }
        if let Some(other) = list.exclusive_with() {
            self.0 &= !other.bit();
        }
        self.0 |= list.bit();
        self.0 != before
    }

    /// Removes a list. Returns `true` if it was present.
    pub fn remove(&mut self, list: MembershipList) -> bool {
        let present = self.contains(list);
        self.0 &= !list.bit();
        present
    }

    /// Lists present in `self` but not in `other`.
    pub fn difference(&self, other: MembershipSet) -> impl Iterator<Item = MembershipList> {
        let bits = self.0 & !other.0;
        MembershipList::ALL
            .into_iter()
            .filter(move |list| bits & list.bit() != 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = MembershipList> {
        let bits = self.0;
        MembershipList::ALL
            .into_iter()
            .filter(move |list| bits & list.bit() != 0)
    }
}

impl From<u8> for MembershipSet {
    fn from(bits: u8) -> Self {
        MembershipSet::from_bits(bits)
    }
}

impl From<MembershipSet> for u8 {
    fn from(set: MembershipSet) -> Self {
        set.0
    }
}

impl FromIterator<MembershipList> for MembershipSet {
    fn from_iter<I: IntoIterator<Item = MembershipList>>(iter: I) -> Self {
        let mut set = MembershipSet::empty();
        for list in iter {
            set.insert(list);
        }
        set
    }
}

// =============================================================================
// Member Role
// =============================================================================

/// Role name the membership service uses for a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemberRole {
    Allow,
    Block,
    Reverse,
    Pending,
}

impl MemberRole {
    /// Wire name of the role.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Allow => "Allow",
            MemberRole::Block => "Block",
            MemberRole::Reverse => "Reverse",
            MemberRole::Pending => "Pending",
        }
    }

    /// The membership list this role populates.
    pub const fn list(&self) -> MembershipList {
        match self {
            MemberRole::Allow => MembershipList::Allowed,
            MemberRole::Block => MembershipList::Blocked,
            MemberRole::Reverse => MembershipList::Reverse,
            MemberRole::Pending => MembershipList::Pending,
        }
    }
}

impl std::str::FromStr for MemberRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Allow" => Ok(MemberRole::Allow),
            "Block" => Ok(MemberRole::Block),
            "Reverse" => Ok(MemberRole::Reverse),
            "Pending" => Ok(MemberRole::Pending),
            other => Err(CoreError::UnknownMemberRole(other.to_string())),
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Contact
// =============================================================================

/// Builds the diff key for an account.
pub fn contact_key(account: &str, client_type: ClientType) -> String {
    format!("{}:{}", account.trim().to_lowercase(), client_type)
}

/// A roster contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Account string (`local@domain` or a phone number).
    pub account: String,

    /// Kind of account.
    pub client_type: ClientType,

    /// Server-assigned address book identifier, once registered.
    pub id: Option<Uuid>,

    /// Display name from the address book.
    pub display_name: Option<String>,

    /// List memberships.
    pub lists: MembershipSet,

    /// Groups the contact belongs to.
    pub groups: BTreeSet<Uuid>,

    /// Membership identifiers assigned by the membership service, per role.
    /// `DeleteMember` addresses the membership by this id when known.
    pub membership_ids: BTreeMap<MemberRole, String>,
}

impl Contact {
    /// Creates an unregistered contact on no lists.
    pub fn new(account: impl Into<String>, client_type: ClientType) -> Self {
        Contact {
            account: account.into().trim().to_string(),
            client_type,
            id: None,
            display_name: None,
            lists: MembershipSet::empty(),
            groups: BTreeSet::new(),
            membership_ids: BTreeMap::new(),
        }
    }

    /// Diff key: `account:ClientType`.
    pub fn hash(&self) -> String {
        contact_key(&self.account, self.client_type)
    }

    #[inline]
    pub fn is_on(&self, list: MembershipList) -> bool {
        self.lists.contains(list)
    }

    /// Whether the only relationship is an inbound one the owner has not
    /// answered: on Pending, or on Reverse with neither Allowed nor Blocked.
    pub fn awaits_owner_decision(&self) -> bool {
        self.is_on(MembershipList::Pending)
            || (self.is_on(MembershipList::Reverse)
                && !self.is_on(MembershipList::Allowed)
                && !self.is_on(MembershipList::Blocked))
    }

    /// Whether the contact can be dropped from the snapshot.
    pub fn is_orphaned(&self) -> bool {
        self.lists.is_empty() && self.id.is_none()
    }
}

/// A contact group from the address book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactGroup {
    pub id: Uuid,
    pub name: String,
}

// =============================================================================
// Owner Settings
// =============================================================================

/// Who may see the owner's presence when not explicitly listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivacyMode {
    /// Everyone except Blocked contacts (`blp=1`).
    AllExceptBlocked,
    /// Only Allowed contacts.
    NoneButAllowed,
}

/// What happens when someone adds the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyPrivacy {
    /// Ask the owner (`gtc=1`).
    PromptOnAdd,
    /// Accept silently.
    AutomaticAdd,
}

/// Privacy and notification settings pushed to the owner's presence state
/// once the roster is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSettings {
    pub privacy: PrivacyMode,
    pub notify: NotifyPrivacy,
    /// `roamliveproperties`: profile roams between clients.
    pub roaming_profile: bool,
    /// `mpop`: multiple points of presence allowed.
    pub multiple_endpoints: bool,
}

impl OwnerSettings {
    /// Derives settings from the owner property map.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Self {
        let flag = |name: &str| properties.get(name).map(|v| v.trim() == "1").unwrap_or(false);

        OwnerSettings {
            privacy: if flag("blp") {
                PrivacyMode::AllExceptBlocked
            } else {
                PrivacyMode::NoneButAllowed
            },
            notify: if flag("gtc") {
                NotifyPrivacy::PromptOnAdd
            } else {
                NotifyPrivacy::AutomaticAdd
            },
            roaming_profile: flag("roamliveproperties"),
            multiple_endpoints: flag("mpop"),
        }
    }
}

impl Default for OwnerSettings {
    fn default() -> Self {
        OwnerSettings::from_properties(&BTreeMap::new())
    }
}

// =============================================================================
// Tests
// =============================================================================
