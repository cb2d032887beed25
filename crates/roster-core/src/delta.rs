//! # Delta Log
//!
//! Incremental server responses not yet folded into a persisted snapshot,
//! plus the per-method endpoint cache learned through discovery.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            DeltaLog                                     │
//! │                                                                         │
//! │  fragments (ordered)            endpoints (per service method)         │
//! │  ┌────┬──────────────┐          ┌──────────────┬────────┬──────────┐   │
//! │  │ 0  │ membership   │          │ method       │ token  │ host     │   │
//! │  │ 1  │ address_book │          │ FindMembership│ abc…  │ bay.…    │   │
//! │  │ …  │ …            │          │ ABFindAll    │ (none) │ by2.…    │   │
//! │  └────┴──────────────┘          └──────────────┴────────┴──────────┘   │
//! │                                                                         │
//! │  truncate(): fragments cleared, endpoints kept                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::snapshot::ServerFragment;
use crate::DELTA_LOG_SCHEMA_VERSION;

/// Routing state cached for one backend service method.
///
/// Token and host are learned independently: a fault may carry either one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointEntry {
    pub auth_cache_token: Option<String>,
    pub preferred_host: Option<String>,
}

impl EndpointEntry {
    /// Non-empty cached token.
    pub fn token(&self) -> Option<&str> {
        self.auth_cache_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Non-empty cached host.
    pub fn host(&self) -> Option<&str> {
        self.preferred_host.as_deref().filter(|h| !h.is_empty())
    }
}

/// Delta and resolver-cache record for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaLog {
    pub schema_version: u32,
    pub fragments: Vec<ServerFragment>,
    pub endpoints: BTreeMap<String, EndpointEntry>,
}

impl Default for DeltaLog {
    fn default() -> Self {
        DeltaLog {
            schema_version: DELTA_LOG_SCHEMA_VERSION,
            fragments: Vec::new(),
            endpoints: BTreeMap::new(),
        }
    }
}

impl DeltaLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, fragment: ServerFragment) {
        self.fragments.push(fragment);
    }

    /// Drops the fragments after they were folded into a saved snapshot.
    /// The endpoint cache survives.
    pub fn truncate(&mut self) {
        self.fragments.clear();
    }

    /// Cached endpoint for a service method, if any.
    pub fn endpoint(&self, method: &str) -> Option<&EndpointEntry> {
        self.endpoints.get(method)
    }

    /// Records discovery results for a method. `None` leaves the
    /// corresponding cached value untouched.
    pub fn record_endpoint(&mut self, method: &str, token: Option<String>, host: Option<String>) {
        let entry = self.endpoints.entry(method.to_string()).or_default();
        if token.is_some() {
            entry.auth_cache_token = token;
        }
        if host.is_some() {
            entry.preferred_host = host;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MembershipFragment;

    #[test]
    fn test_truncate_keeps_endpoints() {
        let mut log = DeltaLog::new();
        log.append(ServerFragment::Membership(MembershipFragment::default()));
        log.record_endpoint("FindMembership", Some("tok".into()), Some("bay.example.com".into()));

        log.truncate();

        assert!(log.fragments.is_empty());
        let entry = log.endpoint("FindMembership").unwrap();
        assert_eq!(entry.token(), Some("tok"));
        assert_eq!(entry.host(), Some("bay.example.com"));
    }

    #[test]
    fn test_token_and_host_cached_independently() {
        let mut log = DeltaLog::new();
        log.record_endpoint("ABFindAll", Some("tok".into()), None);
        log.record_endpoint("ABFindAll", None, Some("by2.example.com".into()));

        let entry = log.endpoint("ABFindAll").unwrap();
        assert_eq!(entry.token(), Some("tok"));
        assert_eq!(entry.host(), Some("by2.example.com"));
    }

    #[test]
    fn test_empty_values_read_as_absent() {
        let entry = EndpointEntry {
            auth_cache_token: Some(String::new()),
            preferred_host: Some(String::new()),
        };
        assert_eq!(entry.token(), None);
        assert_eq!(entry.host(), None);
    }
}
