//! Database schema
//!
//! Every statement is idempotent so initialization can run on every start.

pub const SCHEMA_VERSION: &str = "1";

pub const RECORD_VERSION: &str =
    "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)";

/// Timestamps are stored as milliseconds since the Unix epoch.
pub const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS resources (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        subscription TEXT,
        resource_group TEXT,
        location TEXT,
        properties TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'unknown',
        last_validated_at INTEGER,
        cache_expires_at INTEGER,
        managed_by_toolkit INTEGER NOT NULL DEFAULT 0,
        deleted_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_resources_type_name ON resources (resource_type, name)",
    "CREATE INDEX IF NOT EXISTS idx_resources_group ON resources (resource_group)",
    "CREATE TABLE IF NOT EXISTS dependencies (
        dependent_id TEXT NOT NULL REFERENCES resources (id) ON DELETE CASCADE,
        dependency_id TEXT NOT NULL REFERENCES resources (id) ON DELETE CASCADE,
        dependency_type TEXT NOT NULL DEFAULT 'required',
        relationship TEXT,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (dependent_id, dependency_id),
        CHECK (dependent_id <> dependency_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_dependency ON dependencies (dependency_id)",
    "CREATE TABLE IF NOT EXISTS operations (
        id TEXT PRIMARY KEY,
        definition_id TEXT NOT NULL,
        name TEXT NOT NULL,
        capability TEXT,
        action TEXT,
        target_resource TEXT,
        mode TEXT NOT NULL DEFAULT 'normal',
        status TEXT NOT NULL DEFAULT 'pending',
        current_step INTEGER NOT NULL DEFAULT 0,
        total_steps INTEGER NOT NULL DEFAULT 0,
        current_step_label TEXT,
        error TEXT,
        created_at INTEGER NOT NULL,
        started_at INTEGER,
        finished_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_operations_status ON operations (status, created_at)",
    "CREATE TABLE IF NOT EXISTS operation_logs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        operation_id TEXT NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL,
        logged_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_operation_logs_operation ON operation_logs (operation_id, seq)",
    "CREATE TABLE IF NOT EXISTS resource_locks (
        lock_key TEXT PRIMARY KEY,
        operation_id TEXT NOT NULL,
        acquired_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS audit_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        subject TEXT NOT NULL,
        detail TEXT NOT NULL,
        recorded_at INTEGER NOT NULL
    )",
];
