//! SQLite-backed prefix store
//!
//! One `prefixes` table holds the whole tree. The unique index on
//! `(parent_id, cidr)` is what decides concurrent allocation races: of several
//! writers inserting the same CIDR under the same parent, exactly one insert
//! succeeds and the others get [`StoreError::UniqueConflict`].

use crate::{Prefix, Result, Storage, StoreError, WriteOptions, BRIDGE_PREFIX_NAME};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Maximum pooled connections
const MAX_CONNECTIONS: u32 = 8;

/// How long a connection waits on a locked database
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS prefixes (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    cidr TEXT NOT NULL,
    parent_id TEXT,
    updated_at INTEGER,
    expirable INTEGER NOT NULL DEFAULT 0
)";

const CREATE_INDEXES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS idx_prefixes_parent_id ON prefixes(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_prefixes_updated_at ON prefixes(updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_prefixes_expirable ON prefixes(expirable)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_prefixes_parent_cidr ON prefixes(parent_id, cidr)",
];

const DELETE_SUBTREE: &str = "WITH RECURSIVE subtree(id) AS (
    SELECT id FROM prefixes WHERE id = ?1
    UNION ALL
    SELECT p.id FROM prefixes p JOIN subtree s ON p.parent_id = s.id
)
DELETE FROM prefixes WHERE id IN (SELECT id FROM subtree)";

const DELETE_EXPIRED_BATCH: &str = "WITH RECURSIVE doomed(id) AS (
    SELECT id FROM (
        SELECT id FROM prefixes
        WHERE expirable = 1
          AND updated_at IS NOT NULL
          AND updated_at < ?1
          AND name <> ?2
        LIMIT ?3
    )
    UNION ALL
    SELECT p.id FROM prefixes p JOIN doomed d ON p.parent_id = d.id
)
DELETE FROM prefixes WHERE id IN (SELECT id FROM doomed)";

/// Stored row for a prefix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefixRecord {
    /// Derived primary key
    pub id: String,
    /// Prefix name
    pub name: String,
    /// Allocated CIDR
    pub cidr: String,
    /// Parent id (None for roots)
    pub parent_id: Option<String>,
    /// Last refresh
    pub updated_at: Option<DateTime<Utc>>,
    /// Eligible for garbage collection
    pub expirable: bool,
}

/// A durable prefix store backed by SQLite
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn parent_label(prefix: &Prefix) -> String {
    prefix
        .parent()
        .map(|p| p.id())
        .unwrap_or_else(|| "<root>".to_string())
}

/// Map a write failure onto the store's error kinds
fn classify_write_error(err: sqlx::Error, prefix: &Prefix) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            if db_err.message().contains("prefixes.cidr") {
                return StoreError::UniqueConflict {
                    parent: parent_label(prefix),
                    cidr: prefix.cidr().to_string(),
                };
            }
            return StoreError::AlreadyExists {
                name: prefix.name().to_string(),
                parent: parent_label(prefix),
            };
        }
    }
    StoreError::Database(err)
}

impl SqliteStorage {
    /// Open (or create) the database file and bring the schema up to date
    pub async fn connect(datastore: impl AsRef<Path>) -> Result<Self> {
        let path = datastore.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        info!("SQLite prefix store opened at {}", path.display());
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and bring the schema up to date
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the schema and upgrade databases written before prefixes could expire
    ///
    /// A legacy table lacks the `expirable` column. After adding it, every
    /// node-level-and-below prefix (depth >= 2) except the bridge is marked
    /// expirable and stamped with the current time, so that allocations made
    /// by older releases become subject to garbage collection.
    ///
    /// All steps run in one `BEGIN IMMEDIATE` transaction: concurrent openers
    /// queue on the write lock and see the upgraded schema, and an interrupted
    /// upgrade leaves the legacy table untouched.
    async fn migrate(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        match Self::migrate_locked(&mut conn).await {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(error = %rollback, "Schema migration rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn migrate_locked(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&mut *conn).await?;

        // Read under the write lock; another opener may have just upgraded
        let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info('prefixes')")
            .fetch_all(&mut *conn)
            .await?;
        let has_column = |name: &str| columns.iter().any(|c| c == name);

        if !has_column("updated_at") {
            sqlx::query("ALTER TABLE prefixes ADD COLUMN updated_at INTEGER")
                .execute(&mut *conn)
                .await?;
        }
        let legacy = !has_column("expirable");
        if legacy {
            sqlx::query("ALTER TABLE prefixes ADD COLUMN expirable INTEGER NOT NULL DEFAULT 0")
                .execute(&mut *conn)
                .await?;
            // Older schemas stored roots with an empty parent id
            sqlx::query("UPDATE prefixes SET parent_id = NULL WHERE parent_id = ''")
                .execute(&mut *conn)
                .await?;
        }

        for statement in CREATE_INDEXES {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(|e| StoreError::Migration(format!("{}: {}", statement, e)))?;
        }

        if legacy {
            let marked = sqlx::query(
                "UPDATE prefixes SET expirable = 1, updated_at = ?1
                 WHERE name <> ?2
                   AND parent_id IN (SELECT id FROM prefixes WHERE parent_id IS NOT NULL)",
            )
            .bind(now_millis())
            .bind(BRIDGE_PREFIX_NAME)
            .execute(&mut *conn)
            .await?
            .rows_affected();
            info!(marked, "Migrated legacy prefixes to expirable");
        }

        Ok(())
    }

    /// Fetch the stored row of a prefix
    pub async fn record(&self, prefix: &Prefix) -> Result<Option<PrefixRecord>> {
        let row: Option<(String, String, String, Option<String>, Option<i64>, bool)> =
            sqlx::query_as(
                "SELECT id, name, cidr, parent_id, updated_at, expirable FROM prefixes WHERE id = ?1",
            )
            .bind(prefix.id())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(id, name, cidr, parent_id, updated_at, expirable)| PrefixRecord {
            id,
            name,
            cidr,
            parent_id,
            updated_at: updated_at.and_then(DateTime::from_timestamp_millis),
            expirable,
        }))
    }

    /// Number of stored prefixes
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prefixes")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Delete expirable prefixes not refreshed within `threshold`, with their descendants
    ///
    /// Works in batches of `batch_size` matched prefixes; each batch and its
    /// descendants go in a single statement. Returns the total number of rows
    /// removed.
    #[instrument(skip(self))]
    pub async fn collect_expired(&self, threshold: Duration, batch_size: u32) -> Result<u64> {
        let cutoff = now_millis().saturating_sub(duration_millis(threshold));
        let mut total = 0;
        loop {
            let deleted = sqlx::query(DELETE_EXPIRED_BATCH)
                .bind(cutoff)
                .bind(BRIDGE_PREFIX_NAME)
                .bind(i64::from(batch_size.max(1)))
                .execute(&self.pool)
                .await?
                .rows_affected();
            if deleted == 0 {
                break;
            }
            debug!(deleted, "Removed expired prefix batch");
            total += deleted;
        }
        Ok(total)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    #[instrument(skip(self, prefix), fields(name = prefix.name(), cidr = prefix.cidr()))]
    async fn add(&self, prefix: &Prefix, opts: &WriteOptions) -> Result<()> {
        sqlx::query(
            "INSERT INTO prefixes (id, name, cidr, parent_id, updated_at, expirable)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(prefix.id())
        .bind(prefix.name())
        .bind(prefix.cidr())
        .bind(prefix.parent().map(|p| p.id()))
        .bind(now_millis())
        .bind(opts.expirable)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_write_error(e, prefix))?;
        Ok(())
    }

    #[instrument(skip(self, prefix), fields(name = prefix.name(), cidr = prefix.cidr()))]
    async fn update(&self, prefix: &Prefix, opts: &WriteOptions) -> Result<()> {
        let id = prefix.id();
        let now = now_millis();
        // Damping is part of the WHERE clause so the check and the write are one statement
        let updated = sqlx::query(
            "UPDATE prefixes
             SET cidr = ?1, updated_at = ?2, expirable = MAX(expirable, ?3)
             WHERE id = ?4
               AND (?5 IS NULL OR updated_at IS NULL OR updated_at <= ?2 - ?5)",
        )
        .bind(prefix.cidr())
        .bind(now)
        .bind(opts.expirable)
        .bind(&id)
        .bind(opts.damping.map(duration_millis))
        .execute(&self.pool)
        .await
        .map_err(|e| classify_write_error(e, prefix))?
        .rows_affected();

        if updated == 0 {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM prefixes WHERE id = ?1")
                .bind(&id)
                .fetch_optional(&self.pool)
                .await?;
            if exists.is_none() {
                return Err(StoreError::NotFound(id));
            }
            debug!("Refresh skipped by damping");
        }
        Ok(())
    }

    #[instrument(skip(self, prefix), fields(name = prefix.name(), cidr = prefix.cidr()))]
    async fn delete(&self, prefix: &Prefix) -> Result<()> {
        sqlx::query(DELETE_SUBTREE)
            .bind(prefix.id())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, name: &str, parent: Option<&Prefix>) -> Result<Option<Prefix>> {
        let cidr: Option<String> =
            sqlx::query_scalar("SELECT cidr FROM prefixes WHERE name = ?1 AND parent_id IS ?2")
                .bind(name)
                .bind(parent.map(|p| p.id()))
                .fetch_optional(&self.pool)
                .await?;
        Ok(cidr.map(|cidr| Prefix::new(name, cidr, parent)))
    }

    async fn get_children(&self, parent: &Prefix) -> Result<Vec<Prefix>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, cidr FROM prefixes WHERE parent_id = ?1 ORDER BY rowid")
                .bind(parent.id())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(name, cidr)| Prefix::child(name, cidr, parent))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store(dir: &tempfile::TempDir) -> SqliteStorage {
        SqliteStorage::connect(dir.path().join("registry.db"))
            .await
            .unwrap()
    }

    /// Move a prefix's refresh time into the past
    async fn age(store: &SqliteStorage, prefix: &Prefix, by: Duration) {
        sqlx::query("UPDATE prefixes SET updated_at = ?1 WHERE id = ?2")
            .bind(now_millis() - duration_millis(by))
            .bind(prefix.id())
            .execute(store.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_add_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let opts = WriteOptions::default();

        let p1 = Prefix::root("abc", "192.168.0.0/24");
        store.add(&p1, &opts).await.unwrap();
        assert_eq!(store.get("abc", None).await.unwrap(), Some(p1.clone()));

        let p2 = Prefix::child("abc", "192.168.0.0/28", &p1);
        store.add(&p2, &opts).await.unwrap();
        let p3 = Prefix::child("def", "192.168.0.0/30", &p2);
        store.add(&p3, &opts).await.unwrap();
        let p4 = Prefix::child("ghi", "192.168.0.0/32", &p3);
        store.add(&p4, &opts).await.unwrap();

        assert_eq!(store.get("abc", None).await.unwrap(), Some(p1.clone()));
        let fetched = store.get("abc", Some(&p1)).await.unwrap().unwrap();
        assert_eq!(fetched, p2);
        assert_eq!(fetched.cidr(), "192.168.0.0/28");
        let fetched = store.get("ghi", Some(&p3)).await.unwrap().unwrap();
        assert_eq!(fetched, p4);
        assert_eq!(fetched.parent(), Some(&p3));

        let duplicate = Prefix::root("abc", "192.168.0.1/32");
        assert!(matches!(
            store.add(&duplicate, &opts).await,
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_sqlite_unique_parent_cidr() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let opts = WriteOptions::default();

        let parent = Prefix::root("abc", "192.168.0.0/16");
        store.add(&parent, &opts).await.unwrap();
        store
            .add(&Prefix::child("a", "192.168.0.0/24", &parent), &opts)
            .await
            .unwrap();

        let err = store
            .add(&Prefix::child("b", "192.168.0.0/24", &parent), &opts)
            .await
            .unwrap_err();
        assert!(err.is_uniqueness_conflict());

        // Same CIDR under a different parent is fine
        let other = Prefix::root("def", "192.168.0.0/16");
        store.add(&other, &opts).await.unwrap();
        store
            .add(&Prefix::child("b", "192.168.0.0/24", &other), &opts)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_get_children() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let opts = WriteOptions::default();

        let p1 = Prefix::root("abc", "192.168.0.0/16");
        let p2 = Prefix::child("abc", "192.168.0.0/24", &p1);
        let p3 = Prefix::child("def", "192.168.1.0/24", &p1);
        let p4 = Prefix::child("def", "192.168.1.0/32", &p3);
        for p in [&p1, &p2, &p3, &p4] {
            store.add(p, &opts).await.unwrap();
        }

        let children = store.get_children(&p1).await.unwrap();
        assert_eq!(children, vec![p2.clone(), p3.clone()]);
        assert!(store.get_children(&p2).await.unwrap().is_empty());
        assert_eq!(store.get_children(&p3).await.unwrap(), vec![p4]);
    }

    #[tokio::test]
    async fn test_sqlite_delete_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let opts = WriteOptions::default();

        let p1 = Prefix::root("abc", "192.168.0.0/24");
        let p2 = Prefix::child("abc", "192.168.0.0/32", &p1);
        let p3 = Prefix::child("def", "192.168.0.1/32", &p1);
        let p4 = Prefix::child("ghi", "192.168.0.1/32", &p3);
        for p in [&p1, &p2, &p3, &p4] {
            store.add(p, &opts).await.unwrap();
        }

        store.delete(&p2).await.unwrap();
        assert_eq!(store.get_children(&p1).await.unwrap(), vec![p3.clone()]);

        store.delete(&p1).await.unwrap();
        assert!(store.get("abc", None).await.unwrap().is_none());
        assert!(store.get("def", Some(&p1)).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_update_expirable_and_damping() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let trench = Prefix::root("trench", "10.0.0.0/8");
        store.add(&trench, &WriteOptions::default()).await.unwrap();
        let record = store.record(&trench).await.unwrap().unwrap();
        assert!(!record.expirable);
        assert!(record.updated_at.is_some());

        store.update(&trench, &WriteOptions::expirable()).await.unwrap();
        assert!(store.record(&trench).await.unwrap().unwrap().expirable);

        // A non-expirable refresh keeps the flag
        store.update(&trench, &WriteOptions::default()).await.unwrap();
        assert!(store.record(&trench).await.unwrap().unwrap().expirable);

        // Damped refresh of a young row writes nothing
        age(&store, &trench, Duration::from_secs(10)).await;
        let before = store.record(&trench).await.unwrap().unwrap().updated_at;
        let damped = WriteOptions::expirable().with_damping(Duration::from_secs(60));
        store.update(&trench, &damped).await.unwrap();
        assert_eq!(store.record(&trench).await.unwrap().unwrap().updated_at, before);

        // Older than the damping threshold: refreshed
        age(&store, &trench, Duration::from_secs(120)).await;
        let before = store.record(&trench).await.unwrap().unwrap().updated_at;
        store.update(&trench, &damped).await.unwrap();
        assert!(store.record(&trench).await.unwrap().unwrap().updated_at > before);

        let missing = Prefix::root("missing", "11.0.0.0/8");
        assert!(matches!(
            store.update(&missing, &damped).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_collect_expired_only_removes_stale_expirable() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let keep = WriteOptions::default();
        let expirable = WriteOptions::expirable();

        let trench = Prefix::root("trench", "10.0.0.0/16");
        let conduit = Prefix::child("conduit", "10.0.0.0/20", &trench);
        let stale_node = Prefix::child("node-a", "10.0.0.0/24", &conduit);
        let fresh_node = Prefix::child("node-b", "10.0.1.0/24", &conduit);
        let pinned_node = Prefix::child("node-c", "10.0.2.0/24", &conduit);
        let bridge = Prefix::child(BRIDGE_PREFIX_NAME, "10.0.0.1/32", &stale_node);
        let target = Prefix::child("target", "10.0.0.2/32", &stale_node);

        store.add(&trench, &keep).await.unwrap();
        store.add(&conduit, &keep).await.unwrap();
        store.add(&stale_node, &expirable).await.unwrap();
        store.add(&fresh_node, &expirable).await.unwrap();
        store.add(&pinned_node, &keep).await.unwrap();
        store.add(&bridge, &keep).await.unwrap();
        store.add(&target, &expirable).await.unwrap();

        let old = Duration::from_secs(3600);
        for p in [&trench, &conduit, &stale_node, &pinned_node, &bridge, &target] {
            age(&store, p, old).await;
        }

        let deleted = store
            .collect_expired(Duration::from_secs(600), 50)
            .await
            .unwrap();
        // stale node, its bridge and its target
        assert_eq!(deleted, 3);
        assert!(store.record(&stale_node).await.unwrap().is_none());
        assert!(store.record(&bridge).await.unwrap().is_none());
        assert!(store.record(&target).await.unwrap().is_none());
        assert!(store.record(&fresh_node).await.unwrap().is_some());
        assert!(store.record(&pinned_node).await.unwrap().is_some());
        assert!(store.record(&conduit).await.unwrap().is_some());
        assert!(store.record(&trench).await.unwrap().is_some());

        assert_eq!(
            store.collect_expired(Duration::from_secs(600), 50).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_collect_expired_in_small_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let node = Prefix::root("node", "10.0.0.0/24");
        store.add(&node, &WriteOptions::default()).await.unwrap();
        for i in 1..=7 {
            let child = Prefix::child(format!("child-{}", i), format!("10.0.0.{}/32", i), &node);
            store.add(&child, &WriteOptions::expirable()).await.unwrap();
            age(&store, &child, Duration::from_secs(300)).await;
        }

        let deleted = store.collect_expired(Duration::from_secs(60), 2).await.unwrap();
        assert_eq!(deleted, 7);
        assert!(store.get_children(&node).await.unwrap().is_empty());
    }

    /// Write a table in the pre-expiry layout with one full trench-to-child chain
    async fn create_legacy_db(path: &Path) {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE prefixes (id TEXT PRIMARY KEY, name TEXT, cidr TEXT, parent_id TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        let rows = [
            ("trench", "trench", "10.0.0.0/16", ""),
            ("conduit-trench", "conduit", "10.0.0.0/20", "trench"),
            ("node-conduit-trench", "node", "10.0.0.0/24", "conduit-trench"),
            ("bridge-node-conduit-trench", "bridge", "10.0.0.1/32", "node-conduit-trench"),
            ("target-node-conduit-trench", "target", "10.0.0.2/32", "node-conduit-trench"),
        ];
        for (id, name, cidr, parent_id) in rows {
            sqlx::query("INSERT INTO prefixes (id, name, cidr, parent_id) VALUES (?1, ?2, ?3, ?4)")
                .bind(id)
                .bind(name)
                .bind(cidr)
                .bind(parent_id)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;
    }

    #[tokio::test]
    async fn test_legacy_schema_migration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        create_legacy_db(&path).await;

        let store = SqliteStorage::connect(&path).await.unwrap();
        let trench = Prefix::root("trench", "10.0.0.0/16");
        let conduit = Prefix::child("conduit", "10.0.0.0/20", &trench);
        let node = Prefix::child("node", "10.0.0.0/24", &conduit);
        let bridge = Prefix::child("bridge", "10.0.0.1/32", &node);
        let target = Prefix::child("target", "10.0.0.2/32", &node);

        let trench_record = store.record(&trench).await.unwrap().unwrap();
        assert!(!trench_record.expirable);
        assert!(trench_record.updated_at.is_none());
        assert_eq!(trench_record.parent_id, None);

        let conduit_record = store.record(&conduit).await.unwrap().unwrap();
        assert!(!conduit_record.expirable);
        assert!(conduit_record.updated_at.is_none());

        let bridge_record = store.record(&bridge).await.unwrap().unwrap();
        assert!(!bridge_record.expirable);

        for p in [&node, &target] {
            let record = store.record(p).await.unwrap().unwrap();
            assert!(record.expirable, "{} should be expirable", p.name());
            assert!(record.updated_at.is_some());
        }

        // Roots are still found after the empty parent id was normalized
        assert_eq!(store.get("trench", None).await.unwrap(), Some(trench));

        // Reopening does not re-run the legacy step
        drop(store);
        let store = SqliteStorage::connect(&path).await.unwrap();
        assert!(!store.record(&conduit).await.unwrap().unwrap().expirable);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_opens_of_legacy_database() {
        let dir = tempfile::tempdir().unwrap();

        for round in 0..10 {
            let path = dir.path().join(format!("legacy-{}.db", round));
            create_legacy_db(&path).await;

            let (first, second) =
                tokio::join!(SqliteStorage::connect(&path), SqliteStorage::connect(&path));
            let first = first.unwrap();
            let second = second.unwrap();

            let trench = Prefix::root("trench", "10.0.0.0/16");
            let conduit = Prefix::child("conduit", "10.0.0.0/20", &trench);
            let node = Prefix::child("node", "10.0.0.0/24", &conduit);
            let bridge = Prefix::child("bridge", "10.0.0.1/32", &node);
            let target = Prefix::child("target", "10.0.0.2/32", &node);

            for store in [&first, &second] {
                assert!(store.record(&node).await.unwrap().unwrap().expirable);
                assert!(store.record(&target).await.unwrap().unwrap().expirable);
                assert!(!store.record(&bridge).await.unwrap().unwrap().expirable);
                assert!(!store.record(&conduit).await.unwrap().unwrap().expirable);
                assert_eq!(store.get("trench", None).await.unwrap(), Some(trench.clone()));
            }
            first.pool().close().await;
            second.pool().close().await;
        }
    }
}
