//! Persistent roster: members, communities, memberships and admin grants.
//!
//! Sub-modules:
//! - `types`: identifiers, persisted rows and platform observations.
//! - `schema`: SQLite DDL definitions.
//! - `store`: [`PermissionStore`], the SQLite-backed source of truth.
//! - `sync`: [`RosterSynchronizer`], which folds observed platform state into
//!   the store.

pub(crate) mod schema;
pub mod store;
pub mod sync;
pub mod types;

pub use store::{PermissionStore, RosterTx, StoreResult};
pub use sync::{ReconcileReport, RosterSynchronizer};
pub use types::{
    Community, CommunityId, Member, MemberId, ObservedCommunity, ObservedMember, RosterSnapshot,
};
