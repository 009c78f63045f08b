//! Profile Store
//!
//! SQLite-backed repository for issued client profiles. Owns the two
//! uniqueness invariants directly in the schema: at most one active
//! profile per user and per address (partial unique indexes). The
//! in-process connection mutex serializes allocation transactions so
//! concurrent requests never compute overlapping used-address
//! snapshots; the insert-time conflict retry covers writers outside
//! this process.

use crate::generator::ProfileBuilder;
use crate::pool::{self, Ipv4Cidr, PoolError};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Allocation attempts before giving up under contention
pub const DEFAULT_ALLOCATION_RETRIES: u32 = 5;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS profiles (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL,
    telegram_id     INTEGER NOT NULL,
    private_key     TEXT NOT NULL,
    public_key      TEXT NOT NULL,
    preshared_key   TEXT NOT NULL,
    ip_address      TEXT NOT NULL,
    config_text     TEXT NOT NULL,
    remote_peer_id  TEXT,
    is_active       INTEGER NOT NULL DEFAULT 1,
    created_at      INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_profiles_ip_active
    ON profiles (ip_address) WHERE is_active = 1;

CREATE UNIQUE INDEX IF NOT EXISTS uq_profiles_user_active
    ON profiles (user_id) WHERE is_active = 1;
";

const PROFILE_COLUMNS: &str = "id, user_id, telegram_id, private_key, public_key, \
     preshared_key, ip_address, config_text, remote_peer_id, is_active, created_at";

/// One issued client profile
#[derive(Debug, Clone)]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub telegram_id: i64,
    pub private_key: String,
    pub public_key: String,
    pub preshared_key: String,
    pub ip_address: Ipv4Addr,
    pub config_text: String,
    pub remote_peer_id: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Failed to allocate unique address after retries")]
    DuplicateAddress,

    #[error("No active profile for user {0}")]
    NotFound(i64),
}

/// SQLite-backed profile repository
pub struct ProfileStore {
    conn: Mutex<Connection>,
}

impl ProfileStore {
    /// Open (or create) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (tests and dry runs)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current active profile for `user_id`, if any
    pub fn get_active_for_user(&self, user_id: i64) -> Result<Option<Profile>, StoreError> {
        let conn = self.conn();
        let query = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = ?1 AND is_active = 1"
        );
        let profile = conn
            .query_row(&query, params![user_id], row_to_profile)
            .optional()?;
        Ok(profile)
    }

    /// All profiles ever issued to `user_id`, newest first
    pub fn list_for_user(&self, user_id: i64) -> Result<Vec<Profile>, StoreError> {
        let conn = self.conn();
        let query = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = ?1 \
             ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(params![user_id], row_to_profile)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Addresses currently bound to active profiles
    pub fn active_addresses(&self) -> Result<HashSet<Ipv4Addr>, StoreError> {
        let conn = self.conn();
        used_addresses(&conn)
    }

    /// Allocate an address from `cidr` and persist a new active profile.
    ///
    /// Idempotent: if the user already has an active profile it is
    /// returned unchanged. Insert-time conflicts (another writer
    /// committed the same address between snapshot and insert) abort
    /// the attempt and restart it, up to `retries` times.
    pub fn allocate_and_create(
        &self,
        user_id: i64,
        telegram_id: i64,
        cidr: &Ipv4Cidr,
        builder: &dyn ProfileBuilder,
        retries: u32,
    ) -> Result<Profile, StoreError> {
        for attempt in 1..=retries {
            match self.try_allocate(user_id, telegram_id, cidr, builder) {
                Ok(profile) => return Ok(profile),
                Err(StoreError::Sqlite(err)) if is_write_conflict(&err) => {
                    warn!(
                        user_id,
                        attempt,
                        error = %err,
                        "Address allocation conflict, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Err(StoreError::DuplicateAddress)
    }

    fn try_allocate(
        &self,
        user_id: i64,
        telegram_id: i64,
        cidr: &Ipv4Cidr,
        builder: &dyn ProfileBuilder,
    ) -> Result<Profile, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        // Idempotent re-entry for an already-provisioned user
        let query = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = ?1 AND is_active = 1"
        );
        if let Some(existing) = tx
            .query_row(&query, params![user_id], row_to_profile)
            .optional()?
        {
            debug!(user_id, profile_id = existing.id, "Active profile already exists");
            return Ok(existing);
        }

        let used = used_addresses(&tx)?;
        let address = pool::allocate(cidr, &used)?;
        let material = builder.build(address);
        let created_at = unix_now();

        tx.execute(
            "INSERT INTO profiles \
                 (user_id, telegram_id, private_key, public_key, preshared_key, \
                  ip_address, config_text, is_active, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
            params![
                user_id,
                telegram_id,
                material.private_key,
                material.public_key,
                material.preshared_key,
                address.to_string(),
                material.config_text,
                created_at,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(user_id, profile_id = id, address = %address, "Profile allocated");

        Ok(Profile {
            id,
            user_id,
            telegram_id,
            private_key: material.private_key,
            public_key: material.public_key,
            preshared_key: material.preshared_key,
            ip_address: address,
            config_text: material.config_text,
            remote_peer_id: None,
            is_active: true,
            created_at,
        })
    }

    /// Replace the user's active profile with fresh key material.
    ///
    /// The new row keeps the old address and `remote_peer_id`; the old
    /// row is deactivated in the same transaction, so there is never a
    /// window with zero or two active rows for the user.
    pub fn reissue_for_user(
        &self,
        user_id: i64,
        telegram_id: i64,
        builder: &dyn ProfileBuilder,
    ) -> Result<Profile, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let current = tx
            .query_row(
                "SELECT id, ip_address, remote_peer_id FROM profiles \
                 WHERE user_id = ?1 AND is_active = 1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?
            .ok_or(StoreError::NotFound(user_id))?;

        let (old_id, ip_text, remote_peer_id) = current;
        let address: Ipv4Addr = ip_text
            .parse()
            .map_err(|_| StoreError::NotFound(user_id))?;
        let material = builder.build(address);
        let created_at = unix_now();

        tx.execute(
            "UPDATE profiles SET is_active = 0 WHERE user_id = ?1 AND is_active = 1",
            params![user_id],
        )?;
        tx.execute(
            "INSERT INTO profiles \
                 (user_id, telegram_id, private_key, public_key, preshared_key, \
                  ip_address, config_text, remote_peer_id, is_active, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)",
            params![
                user_id,
                telegram_id,
                material.private_key,
                material.public_key,
                material.preshared_key,
                ip_text,
                material.config_text,
                remote_peer_id,
                created_at,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(user_id, old_id, profile_id = id, "Profile reissued");

        Ok(Profile {
            id,
            user_id,
            telegram_id,
            private_key: material.private_key,
            public_key: material.public_key,
            preshared_key: material.preshared_key,
            ip_address: address,
            config_text: material.config_text,
            remote_peer_id,
            is_active: true,
            created_at,
        })
    }

    /// Record the router-assigned peer id for a profile
    pub fn attach_remote_peer(
        &self,
        profile_id: i64,
        peer_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE profiles SET remote_peer_id = ?2 WHERE id = ?1",
            params![profile_id, peer_id],
        )?;
        Ok(())
    }
}

fn used_addresses(conn: &Connection) -> Result<HashSet<Ipv4Addr>, StoreError> {
    let mut stmt = conn.prepare("SELECT ip_address FROM profiles WHERE is_active = 1")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut used = HashSet::new();
    for row in rows {
        let text = row?;
        match text.parse() {
            Ok(addr) => {
                used.insert(addr);
            }
            Err(_) => {
                warn!(ip_address = %text, "Skipping active row with unparsable address");
            }
        }
    }
    Ok(used)
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let ip_text: String = row.get(6)?;
    let ip_address = ip_text.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Profile {
        id: row.get(0)?,
        user_id: row.get(1)?,
        telegram_id: row.get(2)?,
        private_key: row.get(3)?,
        public_key: row.get(4)?,
        preshared_key: row.get(5)?,
        ip_address,
        config_text: row.get(7)?,
        remote_peer_id: row.get(8)?,
        is_active: row.get(9)?,
        created_at: row.get(10)?,
    })
}

/// A committed write invalidated this attempt's snapshot: either the
/// partial unique index rejected the insert, or SQLite refused to
/// upgrade a stale read transaction to a write.
fn is_write_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                || e.code == rusqlite::ErrorCode::DatabaseBusy
    )
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ProfileMaterial;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Deterministic builder stamping the address into the key fields
    struct FakeBuilder {
        calls: AtomicU32,
    }

    impl FakeBuilder {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ProfileBuilder for FakeBuilder {
        fn build(&self, address: Ipv4Addr) -> ProfileMaterial {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            ProfileMaterial {
                private_key: format!("priv-{address}-{n}"),
                public_key: format!("pub-{address}-{n}"),
                preshared_key: format!("psk-{address}-{n}"),
                config_text: format!("[Interface]\nAddress = {address}/32\n"),
            }
        }
    }

    fn cidr() -> Ipv4Cidr {
        "10.0.0.0/24".parse().unwrap()
    }

    fn allocate(store: &ProfileStore, user_id: i64) -> Profile {
        store
            .allocate_and_create(
                user_id,
                user_id + 1000,
                &cidr(),
                &FakeBuilder::new(),
                DEFAULT_ALLOCATION_RETRIES,
            )
            .unwrap()
    }

    #[test]
    fn test_first_allocation_skips_gateway() {
        let store = ProfileStore::open_in_memory().unwrap();
        let profile = allocate(&store, 1);

        assert_eq!(profile.ip_address, Ipv4Addr::new(10, 0, 0, 2));
        assert!(profile.is_active);
        assert!(profile.remote_peer_id.is_none());
    }

    #[test]
    fn test_allocation_is_idempotent() {
        let store = ProfileStore::open_in_memory().unwrap();
        let first = allocate(&store, 1);
        let second = allocate(&store, 1);

        assert_eq!(first.id, second.id);
        assert_eq!(first.ip_address, second.ip_address);
        assert_eq!(store.list_for_user(1).unwrap().len(), 1);
    }

    #[test]
    fn test_distinct_users_get_distinct_addresses() {
        let store = ProfileStore::open_in_memory().unwrap();
        let a = allocate(&store, 1);
        let b = allocate(&store, 2);
        let c = allocate(&store, 3);

        let mut ips = vec![a.ip_address, b.ip_address, c.ip_address];
        ips.sort();
        ips.dedup();
        assert_eq!(ips.len(), 3);
    }

    #[test]
    fn test_pool_exhaustion_surfaces() {
        let store = ProfileStore::open_in_memory().unwrap();
        let net: Ipv4Cidr = "10.0.0.0/29".parse().unwrap();
        let builder = FakeBuilder::new();

        // /29 has hosts .1-.6; .1 is the reserved gateway
        for user in 1..=5 {
            store
                .allocate_and_create(user, user, &net, &builder, 5)
                .unwrap();
        }

        let err = store
            .allocate_and_create(6, 6, &net, &builder, 5)
            .unwrap_err();
        assert!(matches!(err, StoreError::Pool(PoolError::Exhausted)));
    }

    #[test]
    fn test_unique_index_rejects_duplicate_active_address() {
        let store = ProfileStore::open_in_memory().unwrap();
        allocate(&store, 1);

        let conn = store.conn();
        let result = conn.execute(
            "INSERT INTO profiles \
                 (user_id, telegram_id, private_key, public_key, preshared_key, \
                  ip_address, config_text, is_active, created_at) \
             VALUES (2, 2, 'a', 'b', 'c', '10.0.0.2', 'cfg', 1, 0)",
            [],
        );

        assert!(is_write_conflict(&result.unwrap_err()));
    }

    #[test]
    fn test_concurrent_allocations_are_disjoint() {
        let store = Arc::new(ProfileStore::open_in_memory().unwrap());

        let handles: Vec<_> = (1..=8)
            .map(|user| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .allocate_and_create(
                            user,
                            user,
                            &cidr(),
                            &FakeBuilder::new(),
                            DEFAULT_ALLOCATION_RETRIES,
                        )
                        .unwrap()
                })
            })
            .collect();

        let mut ips: Vec<Ipv4Addr> = handles
            .into_iter()
            .map(|h| h.join().unwrap().ip_address)
            .collect();
        ips.sort();
        let before = ips.len();
        ips.dedup();
        assert_eq!(ips.len(), before);
    }

    /// Builder that races the allocation: on its first call it commits
    /// an active row with the same address through a second connection,
    /// exactly the cross-process interleaving the retry loop exists for.
    struct RacingBuilder {
        rival: ProfileStore,
        inner: FakeBuilder,
    }

    impl ProfileBuilder for RacingBuilder {
        fn build(&self, address: Ipv4Addr) -> ProfileMaterial {
            let material = self.inner.build(address);
            if self.inner.calls() == 1 {
                let conn = self.rival.conn();
                conn.execute(
                    "INSERT INTO profiles \
                         (user_id, telegram_id, private_key, public_key, preshared_key, \
                          ip_address, config_text, is_active, created_at) \
                     VALUES (999, 999, 'r', 'r', 'r', ?1, 'rival', 1, 0)",
                    params![address.to_string()],
                )
                .unwrap();
            }
            material
        }
    }

    #[test]
    fn test_insert_race_triggers_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.db");

        let store = ProfileStore::open(&path).unwrap();
        let builder = RacingBuilder {
            rival: ProfileStore::open(&path).unwrap(),
            inner: FakeBuilder::new(),
        };

        let profile = store
            .allocate_and_create(1, 1, &cidr(), &builder, DEFAULT_ALLOCATION_RETRIES)
            .unwrap();

        // First attempt read an empty pool and lost .2 to the rival;
        // the retry re-read the snapshot and moved on to .3.
        assert_eq!(builder.inner.calls(), 2);
        assert_eq!(profile.ip_address, Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn test_reissue_preserves_address_and_peer() {
        let store = ProfileStore::open_in_memory().unwrap();
        let builder = FakeBuilder::new();
        let original = store
            .allocate_and_create(1, 1001, &cidr(), &builder, DEFAULT_ALLOCATION_RETRIES)
            .unwrap();
        store
            .attach_remote_peer(original.id, Some("*1A"))
            .unwrap();

        let reissued = store.reissue_for_user(1, 1001, &builder).unwrap();

        assert_ne!(reissued.id, original.id);
        assert_eq!(reissued.ip_address, original.ip_address);
        assert_ne!(reissued.private_key, original.private_key);
        assert_eq!(reissued.remote_peer_id.as_deref(), Some("*1A"));

        // Exactly one active row, and it is the new one
        let active = store.get_active_for_user(1).unwrap().unwrap();
        assert_eq!(active.id, reissued.id);
        assert_eq!(store.list_for_user(1).unwrap().len(), 2);
    }

    #[test]
    fn test_reissue_without_active_profile() {
        let store = ProfileStore::open_in_memory().unwrap();
        let err = store
            .reissue_for_user(42, 42, &FakeBuilder::new())
            .unwrap_err();

        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[test]
    fn test_attach_remote_peer() {
        let store = ProfileStore::open_in_memory().unwrap();
        let profile = allocate(&store, 1);

        store.attach_remote_peer(profile.id, Some("*7")).unwrap();
        let loaded = store.get_active_for_user(1).unwrap().unwrap();
        assert_eq!(loaded.remote_peer_id.as_deref(), Some("*7"));

        store.attach_remote_peer(profile.id, None).unwrap();
        let cleared = store.get_active_for_user(1).unwrap().unwrap();
        assert!(cleared.remote_peer_id.is_none());
    }

    #[test]
    fn test_corrupted_address_row_does_not_poison_allocation() {
        let store = ProfileStore::open_in_memory().unwrap();
        {
            let conn = store.conn();
            conn.execute(
                "INSERT INTO profiles \
                     (user_id, telegram_id, private_key, public_key, preshared_key, \
                      ip_address, config_text, is_active, created_at) \
                 VALUES (999, 999, 'a', 'b', 'c', 'garbage', 'cfg', 1, 0)",
                [],
            )
            .unwrap();
        }

        // The bad row is skipped, not fatal, and fresh allocation proceeds
        assert!(store.active_addresses().unwrap().is_empty());
        let profile = allocate(&store, 1);
        assert_eq!(profile.ip_address, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn test_active_addresses() {
        let store = ProfileStore::open_in_memory().unwrap();
        allocate(&store, 1);
        allocate(&store, 2);

        let used = store.active_addresses().unwrap();
        assert_eq!(used.len(), 2);
        assert!(used.contains(&Ipv4Addr::new(10, 0, 0, 2)));
        assert!(used.contains(&Ipv4Addr::new(10, 0, 0, 3)));
    }
}
