//! Roster domain types shared by the store, synchronizer and scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current on-disk schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Platform-assigned identity of a member (a Discord user snowflake).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MemberId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform-assigned identity of a community (a Discord guild snowflake).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommunityId(String);

impl CommunityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CommunityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for CommunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted member row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub display_name: String,
    /// Opt-in for scheduled messages. New members start opted in.
    pub consent: bool,
}

/// Persisted community row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
    /// Gates scheduler participation for the whole community.
    pub enabled: bool,
}

/// A member as seen by the platform at event time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedMember {
    pub id: MemberId,
    pub display_name: String,
    /// Live admin signal from the platform's role state. `None` when the
    /// community's roles are not known yet; grants are then left as they are.
    pub is_admin: Option<bool>,
    pub is_bot: bool,
}

impl ObservedMember {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: MemberId::new(id),
            display_name: display_name.into(),
            is_admin: Some(false),
            is_bot: false,
        }
    }

    #[must_use]
    pub fn admin(mut self, is_admin: bool) -> Self {
        self.is_admin = Some(is_admin);
        self
    }

    /// Mark the admin signal as not observable for this event.
    #[must_use]
    pub fn admin_unknown(mut self) -> Self {
        self.is_admin = None;
        self
    }
}

/// A community as seen by the platform at event time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedCommunity {
    pub id: CommunityId,
    pub name: String,
}

impl ObservedCommunity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: CommunityId::new(id),
            name: name.into(),
        }
    }
}

/// Full roster of one community, as delivered when the bot joins or
/// reconnects to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterSnapshot {
    pub community: ObservedCommunity,
    pub members: Vec<ObservedMember>,
}
