//! SQLite-backed permission store.
//!
//! Sole source of truth for consent, community enablement and admin grants.
//! Thread-safe via an internal `Mutex<Connection>`: every public operation
//! holds the lock for its whole duration, and multi-statement operations run
//! inside one transaction, so two writers touching the same
//! (community, member) pair are serialized and never lose an update.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rand::Rng;
use rand::seq::SliceRandom;
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use super::schema::{apply_schema, read_schema_version};
use super::types::{
    CURRENT_SCHEMA_VERSION, Community, CommunityId, Member, MemberId,
};
use crate::error::StoreError;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent roster and permission state.
pub struct PermissionStore {
    conn: Mutex<Connection>,
}

impl PermissionStore {
    /// Open (or create) the roster database at `path`.
    ///
    /// Creates parent directories, applies the schema and rejects databases
    /// written by a newer schema version.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        if let Some(found) = read_existing_version(&conn)?
            && found > CURRENT_SCHEMA_VERSION
        {
            return Err(StoreError::UnsupportedSchemaVersion {
                found,
                supported: CURRENT_SCHEMA_VERSION,
            });
        }
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Read the current schema version from the database.
    pub fn schema_version(&self) -> StoreResult<Option<u32>> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    /// Run `f` inside one write transaction while holding the store lock.
    ///
    /// The transaction commits only when `f` returns `Ok`; any error rolls
    /// every write back.
    pub fn with_transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&RosterTx<'_>) -> StoreResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&RosterTx { tx: &tx })?;
        tx.commit()?;
        Ok(value)
    }

    // ── reads ───────────────────────────────────────────────────────────

    pub fn member(&self, id: &MemberId) -> StoreResult<Option<Member>> {
        let conn = self.lock()?;
        let member = conn
            .query_row(
                "SELECT id, display_name, consent FROM members WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok(Member {
                        id: MemberId::new(row.get::<_, String>(0)?),
                        display_name: row.get(1)?,
                        consent: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(member)
    }

    pub fn community(&self, id: &CommunityId) -> StoreResult<Option<Community>> {
        let conn = self.lock()?;
        let community = conn
            .query_row(
                "SELECT id, name, enabled FROM communities WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok(Community {
                        id: CommunityId::new(row.get::<_, String>(0)?),
                        name: row.get(1)?,
                        enabled: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(community)
    }

    pub fn is_member_of(&self, member: &MemberId, community: &CommunityId) -> StoreResult<bool> {
        let conn = self.lock()?;
        Ok(RosterTx::exists(
            &conn,
            "SELECT 1 FROM memberships WHERE community_id = ?1 AND member_id = ?2",
            community.as_str(),
            member.as_str(),
        )?)
    }

    /// Communities the member belongs to.
    pub fn memberships_of(&self, member: &MemberId) -> StoreResult<BTreeSet<CommunityId>> {
        let conn = self.lock()?;
        collect_ids(
            &conn,
            "SELECT community_id FROM memberships WHERE member_id = ?1",
            member.as_str(),
            CommunityId::from,
        )
    }

    pub fn is_admin_of(&self, member: &MemberId, community: &CommunityId) -> StoreResult<bool> {
        let conn = self.lock()?;
        Ok(RosterTx::exists(
            &conn,
            "SELECT 1 FROM admin_grants WHERE community_id = ?1 AND member_id = ?2",
            community.as_str(),
            member.as_str(),
        )?)
    }

    /// Communities where the member holds an admin grant.
    pub fn admin_communities(&self, member: &MemberId) -> StoreResult<BTreeSet<CommunityId>> {
        let conn = self.lock()?;
        collect_ids(
            &conn,
            "SELECT community_id FROM admin_grants WHERE member_id = ?1",
            member.as_str(),
            CommunityId::from,
        )
    }

    /// Communities that currently take part in scheduled notifications.
    pub fn enabled_communities(&self) -> StoreResult<Vec<CommunityId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM communities WHERE enabled = 1")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(CommunityId::new(row?));
        }
        Ok(ids)
    }

    /// Consenting members of `community`.
    pub fn eligible_members(&self, community: &CommunityId) -> StoreResult<BTreeSet<MemberId>> {
        let conn = self.lock()?;
        collect_ids(
            &conn,
            "SELECT m.id FROM members m \
             JOIN memberships ms ON ms.member_id = m.id \
             WHERE ms.community_id = ?1 AND m.consent = 1",
            community.as_str(),
            MemberId::from,
        )
    }

    /// Choose one eligible member of `community` uniformly at random.
    ///
    /// The eligible set is materialized first and a single choice is made
    /// from it, so this returns `None` immediately when nobody qualifies.
    pub fn pick_eligible_recipient(&self, community: &CommunityId) -> StoreResult<Option<MemberId>> {
        self.pick_eligible_recipient_with(community, &mut rand::thread_rng())
    }

    /// [`Self::pick_eligible_recipient`] with a caller-supplied RNG.
    pub fn pick_eligible_recipient_with<R: Rng + ?Sized>(
        &self,
        community: &CommunityId,
        rng: &mut R,
    ) -> StoreResult<Option<MemberId>> {
        let eligible: Vec<MemberId> = self.eligible_members(community)?.into_iter().collect();
        Ok(eligible.choose(rng).cloned())
    }

    // ── writes ──────────────────────────────────────────────────────────

    /// Set the member's consent flag. Idempotent; admin grants and
    /// memberships are untouched. Returns `false` for an unknown member.
    pub fn set_consent(&self, member: &MemberId, consent: bool) -> StoreResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE members SET consent = ?1 WHERE id = ?2",
            params![bool_to_int(consent), member.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// Enable or disable scheduled notifications for a community. Idempotent.
    /// Returns `false` for an unknown community.
    pub fn set_enabled(&self, community: &CommunityId, enabled: bool) -> StoreResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE communities SET enabled = ?1 WHERE id = ?2",
            params![bool_to_int(enabled), community.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// Remove a community together with its memberships and grants.
    pub fn remove_community(&self, community: &CommunityId) -> StoreResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM communities WHERE id = ?1",
            params![community.as_str()],
        )?;
        Ok(rows > 0)
    }
}

/// Row-level roster primitives available inside
/// [`PermissionStore::with_transaction`].
pub struct RosterTx<'a> {
    tx: &'a Transaction<'a>,
}

impl RosterTx<'_> {
    /// Display name of the member, or `None` when no row exists.
    pub fn member_name(&self, id: &MemberId) -> StoreResult<Option<String>> {
        Ok(self
            .tx
            .query_row(
                "SELECT display_name FROM members WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Insert a member with `consent = true`.
    pub fn insert_member(&self, id: &MemberId, display_name: &str) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO members (id, display_name, consent, created_at) VALUES (?1, ?2, 1, ?3)",
            params![id.as_str(), display_name, now_epoch_secs()],
        )?;
        Ok(())
    }

    pub fn rename_member(&self, id: &MemberId, display_name: &str) -> StoreResult<()> {
        self.tx.execute(
            "UPDATE members SET display_name = ?1 WHERE id = ?2",
            params![display_name, id.as_str()],
        )?;
        Ok(())
    }

    /// Name of the community, or `None` when no row exists.
    pub fn community_name(&self, id: &CommunityId) -> StoreResult<Option<String>> {
        Ok(self
            .tx
            .query_row(
                "SELECT name FROM communities WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Insert a community with `enabled = true`.
    pub fn insert_community(&self, id: &CommunityId, name: &str) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO communities (id, name, enabled, created_at) VALUES (?1, ?2, 1, ?3)",
            params![id.as_str(), name, now_epoch_secs()],
        )?;
        Ok(())
    }

    pub fn rename_community(&self, id: &CommunityId, name: &str) -> StoreResult<()> {
        self.tx.execute(
            "UPDATE communities SET name = ?1 WHERE id = ?2",
            params![name, id.as_str()],
        )?;
        Ok(())
    }

    pub fn membership_exists(&self, community: &CommunityId, member: &MemberId) -> StoreResult<bool> {
        Ok(Self::exists(
            self.tx,
            "SELECT 1 FROM memberships WHERE community_id = ?1 AND member_id = ?2",
            community.as_str(),
            member.as_str(),
        )?)
    }

    pub fn insert_membership(&self, community: &CommunityId, member: &MemberId) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO memberships (community_id, member_id) VALUES (?1, ?2)",
            params![community.as_str(), member.as_str()],
        )?;
        Ok(())
    }

    pub fn admin_grant_exists(&self, community: &CommunityId, member: &MemberId) -> StoreResult<bool> {
        Ok(Self::exists(
            self.tx,
            "SELECT 1 FROM admin_grants WHERE community_id = ?1 AND member_id = ?2",
            community.as_str(),
            member.as_str(),
        )?)
    }

    pub fn insert_admin_grant(&self, community: &CommunityId, member: &MemberId) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO admin_grants (community_id, member_id, granted_at) VALUES (?1, ?2, ?3)",
            params![community.as_str(), member.as_str(), now_epoch_secs()],
        )?;
        Ok(())
    }

    pub fn delete_admin_grant(&self, community: &CommunityId, member: &MemberId) -> StoreResult<()> {
        self.tx.execute(
            "DELETE FROM admin_grants WHERE community_id = ?1 AND member_id = ?2",
            params![community.as_str(), member.as_str()],
        )?;
        Ok(())
    }

    fn exists(conn: &Connection, sql: &str, community: &str, member: &str) -> rusqlite::Result<bool> {
        conn.query_row(sql, params![community, member], |_| Ok(()))
            .optional()
            .map(|row| row.is_some())
    }
}

fn read_existing_version(conn: &Connection) -> StoreResult<Option<u32>> {
    let has_meta: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_meta'",
            [],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !has_meta {
        return Ok(None);
    }
    Ok(read_schema_version(conn)?)
}

fn collect_ids<T>(
    conn: &Connection,
    sql: &str,
    key: &str,
    wrap: fn(String) -> T,
) -> StoreResult<BTreeSet<T>>
where
    T: Ord,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
    let mut ids = BTreeSet::new();
    for row in rows {
        ids.insert(wrap(row?));
    }
    Ok(ids)
}

fn bool_to_int(value: bool) -> i64 {
    if value { 1 } else { 0 }
}

fn now_epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
