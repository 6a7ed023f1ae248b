//! SQL migration definitions for the SchoolIntel cache database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: cache_entries keyed by entity + data type",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (entity, data type); payload is a serialized SchoolRecord
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key    TEXT PRIMARY KEY,
    entity_key   TEXT NOT NULL,
    data_type    TEXT NOT NULL,
    payload      TEXT NOT NULL,
    sources_json TEXT NOT NULL DEFAULT '[]',
    created_at   INTEGER NOT NULL,
    ttl_hours    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entity ON cache_entries(entity_key);
CREATE INDEX IF NOT EXISTS idx_cache_created ON cache_entries(created_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
