//! libSQL-backed result cache with a time-to-live.
//!
//! The [`Cache`] stores one finished [`SchoolRecord`] per (school, data type)
//! key. Reads never fail: a disabled cache, a missing row, an unreadable row
//! or an expired row are all reported as a miss. Writes never fail either;
//! errors are logged and reported as `false`.
//!
//! An entry is expired once `now > created_at + ttl`. The boundary instant
//! itself is still a hit.

mod migrations;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use libsql::{Connection, Database, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use schoolintel_shared::{CacheConfig, Result, SchoolIntelError, SchoolRecord};

/// Data-type tag for full school dossiers.
pub const SCHOOL_RECORD: &str = "school_record";

// ---------------------------------------------------------------------------
// Keys and entries
// ---------------------------------------------------------------------------

/// Identifies one cache row: a hash of the lowercased entity name and the
/// data-type tag, plus the parts it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    hash: String,
    entity_key: String,
    data_type: String,
}

impl CacheKey {
    pub fn new(entity_name: &str, data_type: &str) -> Self {
        let entity_key = normalize_entity(entity_name);
        let mut hasher = Sha256::new();
        hasher.update(entity_key.as_bytes());
        hasher.update(b":");
        hasher.update(data_type.as_bytes());
        Self {
            hash: format!("{:x}", hasher.finalize()),
            entity_key,
            data_type: data_type.to_string(),
        }
    }

    /// Key for a full school dossier.
    pub fn school(name: &str) -> Self {
        Self::new(name, SCHOOL_RECORD)
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }

    pub fn entity_key(&self) -> &str {
        &self.entity_key
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }
}

fn normalize_entity(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A cached record with its provenance and lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub entity_key: String,
    pub data_type: String,
    pub record: SchoolRecord,
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub ttl_hours: u32,
}

impl CacheEntry {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::hours(i64::from(self.ttl_hours))
    }

    /// Strictly after the expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

/// Counters and sizes reported by `cache stats`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    /// `hits / (hits + misses)`, or 0.0 before any lookup.
    pub hit_rate: f64,
    pub active: u64,
    pub expired: u64,
    /// Total payload bytes stored.
    pub size_bytes: u64,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Primary cache handle wrapping a libSQL database.
pub struct Cache {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    enabled: bool,
    ttl_hours: u32,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl Cache {
    /// Open or create a cache database at `path`.
    pub async fn open(path: &Path, config: &CacheConfig) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SchoolIntelError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SchoolIntelError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SchoolIntelError::Storage(e.to_string()))?;

        let cache = Self {
            db,
            conn,
            enabled: config.enabled,
            ttl_hours: config.ttl_hours,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        };
        cache.run_migrations().await?;
        Ok(cache)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SchoolIntelError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl_hours(&self) -> u32 {
        self.ttl_hours
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Look up a live entry.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.get_at(key, Utc::now()).await
    }

    /// Look up an entry as of `now`. Expired rows are left in place.
    pub async fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }

        let entry = match self.read_entry(key).await {
            Ok(Some(entry)) if !entry.is_expired_at(now) => Some(entry),
            Ok(Some(entry)) => {
                debug!(entity = %entry.entity_key, expired_at = %entry.expires_at(), "cache entry expired");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(entity = %key.entity_key, error = %e, "unreadable cache entry treated as miss");
                None
            }
        };

        match entry {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(entity = %entry.entity_key, "cache hit");
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn read_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT cache_key, entity_key, data_type, payload, sources_json, created_at, ttl_hours
                 FROM cache_entries WHERE cache_key = ?1",
                params![key.as_str()],
            )
            .await
            .map_err(|e| SchoolIntelError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_entry(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(SchoolIntelError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Store a record under `key`, stamped with the current time and the
    /// configured TTL. Returns whether the write landed.
    pub async fn set(&self, key: &CacheKey, record: &SchoolRecord, sources: &[String]) -> bool {
        if !self.enabled {
            return false;
        }

        match self.write_entry(key, record, sources, Utc::now()).await {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                debug!(entity = %key.entity_key, ttl_hours = self.ttl_hours, "cache write");
                true
            }
            Err(e) => {
                warn!(entity = %key.entity_key, error = %e, "cache write failed");
                false
            }
        }
    }

    async fn write_entry(
        &self,
        key: &CacheKey,
        record: &SchoolRecord,
        sources: &[String],
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let payload = serde_json::to_string(record)
            .map_err(|e| SchoolIntelError::Storage(format!("serialize record: {e}")))?;
        let sources_json = serde_json::to_string(sources)
            .map_err(|e| SchoolIntelError::Storage(format!("serialize sources: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO cache_entries (cache_key, entity_key, data_type, payload, sources_json, created_at, ttl_hours)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(cache_key) DO UPDATE SET
                   payload = excluded.payload,
                   sources_json = excluded.sources_json,
                   created_at = excluded.created_at,
                   ttl_hours = excluded.ttl_hours",
                params![
                    key.as_str(),
                    key.entity_key.as_str(),
                    key.data_type.as_str(),
                    payload,
                    sources_json,
                    created_at.timestamp(),
                    i64::from(self.ttl_hours),
                ],
            )
            .await
            .map_err(|e| SchoolIntelError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    /// Delete one exact entry.
    pub async fn invalidate_key(&self, key: &CacheKey) -> Result<u64> {
        self.conn
            .execute(
                "DELETE FROM cache_entries WHERE cache_key = ?1",
                params![key.as_str()],
            )
            .await
            .map_err(|e| SchoolIntelError::Storage(e.to_string()))
    }

    /// Delete every entry (any data type) for an entity name.
    pub async fn invalidate_entity(&self, entity_name: &str) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM cache_entries WHERE entity_key = ?1",
                params![normalize_entity(entity_name)],
            )
            .await
            .map_err(|e| SchoolIntelError::Storage(e.to_string()))?;
        info!(entity = entity_name, removed, "invalidated cache entries");
        Ok(removed)
    }

    /// Delete everything.
    pub async fn clear(&self) -> Result<u64> {
        self.conn
            .execute("DELETE FROM cache_entries", params![])
            .await
            .map_err(|e| SchoolIntelError::Storage(e.to_string()))
    }

    /// Sweep entries whose TTL has passed.
    pub async fn clear_expired(&self) -> Result<u64> {
        self.clear_expired_at(Utc::now()).await
    }

    /// Sweep entries expired as of `now`.
    pub async fn clear_expired_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM cache_entries WHERE created_at + ttl_hours * 3600 < ?1",
                params![now.timestamp()],
            )
            .await
            .map_err(|e| SchoolIntelError::Storage(e.to_string()))?;
        info!(removed, "cleared expired cache entries");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    /// Session counters plus stored-entry counts.
    pub async fn stats(&self) -> Result<CacheStats> {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN created_at + ttl_hours * 3600 < ?1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(LENGTH(payload)), 0)
                 FROM cache_entries",
                params![Utc::now().timestamp()],
            )
            .await
            .map_err(|e| SchoolIntelError::Storage(e.to_string()))?;

        let (total, expired, size) = match rows.next().await {
            Ok(Some(row)) => (
                row.get::<i64>(0).unwrap_or(0),
                row.get::<i64>(1).unwrap_or(0),
                row.get::<i64>(2).unwrap_or(0),
            ),
            Ok(None) => (0, 0, 0),
            Err(e) => return Err(SchoolIntelError::Storage(e.to_string())),
        };

        Ok(CacheStats {
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            active: (total - expired).max(0) as u64,
            expired: expired.max(0) as u64,
            size_bytes: size.max(0) as u64,
        })
    }
}

/// Convert a database row to a [`CacheEntry`].
fn row_to_entry(row: &libsql::Row) -> Result<CacheEntry> {
    let payload: String = row
        .get(3)
        .map_err(|e| SchoolIntelError::Storage(e.to_string()))?;
    let sources_json: String = row
        .get(4)
        .map_err(|e| SchoolIntelError::Storage(e.to_string()))?;
    let created_secs: i64 = row
        .get(5)
        .map_err(|e| SchoolIntelError::Storage(e.to_string()))?;
    let ttl_hours: i64 = row
        .get(6)
        .map_err(|e| SchoolIntelError::Storage(e.to_string()))?;

    Ok(CacheEntry {
        key: row
            .get::<String>(0)
            .map_err(|e| SchoolIntelError::Storage(e.to_string()))?,
        entity_key: row
            .get::<String>(1)
            .map_err(|e| SchoolIntelError::Storage(e.to_string()))?,
        data_type: row
            .get::<String>(2)
            .map_err(|e| SchoolIntelError::Storage(e.to_string()))?,
        record: serde_json::from_str(&payload)
            .map_err(|e| SchoolIntelError::Storage(format!("invalid payload: {e}")))?,
        sources: serde_json::from_str(&sources_json)
            .map_err(|e| SchoolIntelError::Storage(format!("invalid sources: {e}")))?,
        created_at: Utc
            .timestamp_opt(created_secs, 0)
            .single()
            .ok_or_else(|| SchoolIntelError::Storage(format!("invalid timestamp: {created_secs}")))?,
        ttl_hours: u32::try_from(ttl_hours)
            .map_err(|_| SchoolIntelError::Storage(format!("invalid ttl: {ttl_hours}")))?,
    })
}
