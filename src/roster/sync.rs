//! Roster reconciliation.
//!
//! Brings persisted roster state in line with what the platform reports
//! before any command logic reads it. Every reconciliation runs in a single
//! store transaction, so it either lands completely or not at all, and a
//! repeat with unchanged inputs performs no writes.

use std::sync::Arc;

use tracing::{debug, warn};

use super::store::{PermissionStore, RosterTx, StoreResult};
use super::types::{ObservedCommunity, ObservedMember, RosterSnapshot};
use crate::error::ReconciliationError;

/// Writes performed by one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub members_created: u32,
    pub communities_created: u32,
    pub memberships_created: u32,
    pub grants_added: u32,
    pub grants_removed: u32,
    pub renames: u32,
}

impl ReconcileReport {
    /// Total row writes.
    #[must_use]
    pub fn writes(&self) -> u32 {
        self.members_created
            + self.communities_created
            + self.memberships_created
            + self.grants_added
            + self.grants_removed
            + self.renames
    }

    fn absorb(&mut self, other: ReconcileReport) {
        self.members_created += other.members_created;
        self.communities_created += other.communities_created;
        self.memberships_created += other.memberships_created;
        self.grants_added += other.grants_added;
        self.grants_removed += other.grants_removed;
        self.renames += other.renames;
    }
}

/// Applies observed roster and role state to the [`PermissionStore`].
#[derive(Clone)]
pub struct RosterSynchronizer {
    store: Arc<PermissionStore>,
}

impl RosterSynchronizer {
    pub fn new(store: Arc<PermissionStore>) -> Self {
        Self { store }
    }

    /// Reconcile one observed event author.
    ///
    /// Bot accounts are ignored. Outside a community only the member row is
    /// ensured; the admin flag is meaningful only together with a community,
    /// and an unknown flag leaves the grant untouched.
    pub fn reconcile(
        &self,
        member: &ObservedMember,
        community: Option<&ObservedCommunity>,
    ) -> Result<ReconcileReport, ReconciliationError> {
        if member.is_bot {
            return Ok(ReconcileReport::default());
        }

        let report = self
            .store
            .with_transaction(|tx| reconcile_in(tx, member, community))
            .map_err(|source| ReconciliationError {
                member: member.id.clone(),
                source,
            })?;

        if report.writes() > 0 {
            debug!(
                member = %member.id,
                community = ?community.map(|c| c.id.as_str()),
                writes = report.writes(),
                "roster reconciled"
            );
        }
        Ok(report)
    }

    /// Apply a full community roster in one transaction.
    ///
    /// Members missing from the snapshot are left in place; only grants of
    /// members present in the snapshot are adjusted.
    pub fn reconcile_roster(
        &self,
        snapshot: &RosterSnapshot,
    ) -> Result<ReconcileReport, ReconciliationError> {
        let mut failed_member = None;
        let result = self.store.with_transaction(|tx| {
            let mut total = ReconcileReport::default();
            total.absorb(ensure_community(tx, &snapshot.community)?);
            for member in snapshot.members.iter().filter(|m| !m.is_bot) {
                match reconcile_in(tx, member, Some(&snapshot.community)) {
                    Ok(report) => total.absorb(report),
                    Err(err) => {
                        failed_member = Some(member.id.clone());
                        return Err(err);
                    }
                }
            }
            Ok(total)
        });

        match result {
            Ok(report) => {
                debug!(
                    community = %snapshot.community.id,
                    members = snapshot.members.len(),
                    writes = report.writes(),
                    "community roster reconciled"
                );
                Ok(report)
            }
            Err(source) => {
                let member = failed_member
                    .or_else(|| snapshot.members.first().map(|m| m.id.clone()))
                    .unwrap_or_else(|| crate::roster::MemberId::new(""));
                warn!(community = %snapshot.community.id, "roster snapshot rejected: {source}");
                Err(ReconciliationError { member, source })
            }
        }
    }
}

fn reconcile_in(
    tx: &RosterTx<'_>,
    member: &ObservedMember,
    community: Option<&ObservedCommunity>,
) -> StoreResult<ReconcileReport> {
    let mut report = ReconcileReport::default();

    match tx.member_name(&member.id)? {
        None => {
            tx.insert_member(&member.id, &member.display_name)?;
            report.members_created += 1;
        }
        Some(name) if name != member.display_name && !member.display_name.is_empty() => {
            tx.rename_member(&member.id, &member.display_name)?;
            report.renames += 1;
        }
        Some(_) => {}
    }

    let Some(community) = community else {
        return Ok(report);
    };

    report.absorb(ensure_community(tx, community)?);

    if !tx.membership_exists(&community.id, &member.id)? {
        tx.insert_membership(&community.id, &member.id)?;
        report.memberships_created += 1;
    }

    let granted = tx.admin_grant_exists(&community.id, &member.id)?;
    match (member.is_admin, granted) {
        (Some(true), false) => {
            tx.insert_admin_grant(&community.id, &member.id)?;
            report.grants_added += 1;
        }
        (Some(false), true) => {
            tx.delete_admin_grant(&community.id, &member.id)?;
            report.grants_removed += 1;
        }
        _ => {}
    }

    Ok(report)
}

fn ensure_community(tx: &RosterTx<'_>, community: &ObservedCommunity) -> StoreResult<ReconcileReport> {
    let mut report = ReconcileReport::default();
    match tx.community_name(&community.id)? {
        None => {
            tx.insert_community(&community.id, &community.name)?;
            report.communities_created += 1;
        }
        Some(name) if name != community.name && !community.name.is_empty() => {
            tx.rename_community(&community.id, &community.name)?;
            report.renames += 1;
        }
        Some(_) => {}
    }
    Ok(report)
}
