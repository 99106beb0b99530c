//! Authorization gate for privileged commands.
//!
//! Read-only: decisions are derived from persisted admin grants, which only
//! the roster synchronizer writes.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::roster::{CommunityId, MemberId, PermissionStore, StoreResult};

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// The caller may proceed; the effect applies to `scope`.
    Allowed { scope: BTreeSet<CommunityId> },
    Denied,
}

impl Authorization {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Communities a privileged effect should touch. Empty when denied.
    #[must_use]
    pub fn scope(&self) -> Vec<CommunityId> {
        match self {
            Self::Allowed { scope } => scope.iter().cloned().collect(),
            Self::Denied => Vec::new(),
        }
    }
}

/// Decides whether a caller may invoke a privileged command.
#[derive(Clone)]
pub struct CommandAuthorizer {
    store: Arc<PermissionStore>,
}

impl CommandAuthorizer {
    pub fn new(store: Arc<PermissionStore>) -> Self {
        Self { store }
    }

    /// Inside a community the caller must administer that community.
    /// Without one (a direct message) any admin grant suffices, and the
    /// scope covers every community the caller administers.
    pub fn authorize(
        &self,
        member: &MemberId,
        community: Option<&CommunityId>,
    ) -> StoreResult<Authorization> {
        match community {
            Some(community) => {
                if self.store.is_admin_of(member, community)? {
                    Ok(Authorization::Allowed {
                        scope: BTreeSet::from([community.clone()]),
                    })
                } else {
                    Ok(Authorization::Denied)
                }
            }
            None => {
                let scope = self.store.admin_communities(member)?;
                if scope.is_empty() {
                    Ok(Authorization::Denied)
                } else {
                    Ok(Authorization::Allowed { scope })
                }
            }
        }
    }
}
