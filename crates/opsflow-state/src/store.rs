//! SQLite state store
//!
//! All values are passed as bound parameters. Each write is one statement, so
//! concurrent writers (other processes included) see atomic row updates.

use crate::error::{Result, StoreError};
use crate::model::*;
use crate::schema;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the state database
#[derive(Debug, Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Connect with a SQLite URL (e.g. `sqlite://state.db`) and initialize the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open (or create) a database file
    #[tracing::instrument]
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database
    ///
    /// A single connection that is never recycled, since every new
    /// `:memory:` connection would be a separate empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist
    pub async fn init_schema(&self) -> Result<()> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        sqlx::query(schema::RECORD_VERSION)
            .bind(schema::SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;
        tracing::debug!(version = schema::SCHEMA_VERSION, "State schema ready");
        Ok(())
    }

    pub async fn schema_version(&self) -> Result<Option<String>> {
        let version = sqlx::query_scalar::<_, String>(
            "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(version)
    }

    // ---------------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------------

    /// Insert or refresh a resource
    ///
    /// Clears `deleted_at` and never turns `managed_by_toolkit` from true to false.
    pub async fn upsert_resource(&self, resource: &ResourceRecord) -> Result<()> {
        let properties = serde_json::to_string(&resource.properties)
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;

        sqlx::query(
            "INSERT INTO resources (
                id, name, resource_type, subscription, resource_group, location,
                properties, status, last_validated_at, cache_expires_at,
                managed_by_toolkit, deleted_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, ?12, ?13)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                resource_type = excluded.resource_type,
                subscription = excluded.subscription,
                resource_group = excluded.resource_group,
                location = COALESCE(excluded.location, resources.location),
                properties = excluded.properties,
                status = excluded.status,
                last_validated_at = excluded.last_validated_at,
                cache_expires_at = excluded.cache_expires_at,
                managed_by_toolkit = MAX(resources.managed_by_toolkit, excluded.managed_by_toolkit),
                deleted_at = NULL,
                updated_at = excluded.updated_at",
        )
        .bind(&resource.id)
        .bind(&resource.name)
        .bind(&resource.resource_type)
        .bind(&resource.subscription)
        .bind(&resource.resource_group)
        .bind(&resource.location)
        .bind(properties)
        .bind(resource.status.as_str())
        .bind(resource.last_validated_at.map(millis))
        .bind(resource.cache_expires_at.map(millis))
        .bind(resource.managed_by_toolkit)
        .bind(millis(resource.created_at))
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        tracing::debug!(resource_id = %resource.id, status = %resource.status, "Upserted resource");
        Ok(())
    }

    /// Get a resource by id, including soft-deleted rows
    pub async fn get_resource(&self, id: &str) -> Result<Option<ResourceRecord>> {
        sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ResourceRecord::try_from)
            .transpose()
    }

    /// Find a live resource by identity
    ///
    /// Scope components that are `None` match any value.
    pub async fn find_resource(
        &self,
        resource_type: &str,
        name: &str,
        scope: &ResourceScope,
    ) -> Result<Option<ResourceRecord>> {
        sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources
             WHERE resource_type = ?1 AND name = ?2
               AND (?3 IS NULL OR subscription = ?3)
               AND (?4 IS NULL OR resource_group = ?4)
               AND deleted_at IS NULL
             ORDER BY updated_at DESC
             LIMIT 1",
        )
        .bind(resource_type)
        .bind(name)
        .bind(&scope.subscription)
        .bind(&scope.resource_group)
        .fetch_optional(&self.pool)
        .await?
        .map(ResourceRecord::try_from)
        .transpose()
    }

    pub async fn list_resources(&self, filter: &ResourceFilter) -> Result<Vec<ResourceRecord>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources
             WHERE (?1 IS NULL OR resource_type GLOB ?1)
               AND (?2 IS NULL OR subscription = ?2)
               AND (?3 IS NULL OR resource_group = ?3)
               AND (?4 OR deleted_at IS NULL)
             ORDER BY resource_type, name, id",
        )
        .bind(&filter.resource_type)
        .bind(&filter.subscription)
        .bind(&filter.resource_group)
        .bind(filter.include_deleted)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ResourceRecord::try_from).collect()
    }

    /// Mark a resource deleted; returns false when it was unknown or already deleted
    pub async fn soft_delete_resource(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE resources SET deleted_at = ?2, status = 'deleted', updated_at = ?2
             WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_managed(&self, id: &str, managed: bool) -> Result<()> {
        let result = sqlx::query("UPDATE resources SET managed_by_toolkit = ?2 WHERE id = ?1")
            .bind(id)
            .bind(managed)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownResource(id.to_string()));
        }
        Ok(())
    }

    pub async fn touch_cache(
        &self,
        id: &str,
        validated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE resources SET last_validated_at = ?2, cache_expires_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(millis(validated_at))
        .bind(millis(expires_at))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownResource(id.to_string()));
        }
        Ok(())
    }

    /// Mark every resource whose type matches the glob pattern as stale
    ///
    /// Recorded in the audit table together with the reason.
    #[tracing::instrument(skip(self, now))]
    pub async fn invalidate_cache(
        &self,
        type_pattern: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let affected = sqlx::query(
            "UPDATE resources SET cache_expires_at = NULL
             WHERE resource_type GLOB ?1 AND cache_expires_at IS NOT NULL",
        )
        .bind(type_pattern)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let detail = serde_json::json!({ "reason": reason, "affected": affected }).to_string();
        self.record_audit_at("cache_invalidated", type_pattern, &detail, now)
            .await?;

        tracing::info!(pattern = type_pattern, reason, affected, "Invalidated resource cache");
        Ok(affected)
    }

    /// Hard-delete soft-deleted resources whose cache entry has expired
    ///
    /// Their dependency edges go with them.
    #[tracing::instrument(skip(self))]
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let purged = sqlx::query(
            "DELETE FROM resources
             WHERE deleted_at IS NOT NULL
               AND (cache_expires_at IS NULL OR cache_expires_at <= ?1)",
        )
        .bind(millis(now))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if purged > 0 {
            let detail = serde_json::json!({ "purged": purged }).to_string();
            self.record_audit_at("resources_purged", "resources", &detail, now)
                .await?;
        }
        tracing::info!(purged, "Purged deleted resources");
        Ok(purged)
    }

    // ---------------------------------------------------------------------
    // Dependencies
    // ---------------------------------------------------------------------

    /// Record an edge; re-adding an edge updates its type and relationship
    pub async fn add_dependency(&self, edge: &DependencyEdge) -> Result<()> {
        if edge.dependent_id == edge.dependency_id {
            return Err(StoreError::SelfDependency(edge.dependent_id.clone()));
        }
        for id in [&edge.dependent_id, &edge.dependency_id] {
            let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM resources WHERE id = ?1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
            if exists == 0 {
                return Err(StoreError::UnknownResource(id.clone()));
            }
        }

        sqlx::query(
            "INSERT INTO dependencies (dependent_id, dependency_id, dependency_type, relationship, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (dependent_id, dependency_id) DO UPDATE SET
                dependency_type = excluded.dependency_type,
                relationship = excluded.relationship",
        )
        .bind(&edge.dependent_id)
        .bind(&edge.dependency_id)
        .bind(edge.dependency_type.as_str())
        .bind(&edge.relationship)
        .bind(millis(edge.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Edges where `id` is the dependent
    pub async fn dependencies_of(&self, id: &str) -> Result<Vec<DependencyEdge>> {
        let rows = sqlx::query_as::<_, DependencyRow>(
            "SELECT * FROM dependencies WHERE dependent_id = ?1 ORDER BY dependency_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DependencyEdge::try_from).collect()
    }

    /// Edges where `id` is the dependency
    pub async fn dependents_of(&self, id: &str) -> Result<Vec<DependencyEdge>> {
        let rows = sqlx::query_as::<_, DependencyRow>(
            "SELECT * FROM dependencies WHERE dependency_id = ?1 ORDER BY dependent_id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DependencyEdge::try_from).collect()
    }

    pub async fn list_dependencies(&self) -> Result<Vec<DependencyEdge>> {
        let rows = sqlx::query_as::<_, DependencyRow>(
            "SELECT * FROM dependencies ORDER BY dependent_id, dependency_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DependencyEdge::try_from).collect()
    }

    // ---------------------------------------------------------------------
    // Operations
    // ---------------------------------------------------------------------

    /// Create a `pending` operation row
    #[tracing::instrument(skip(self, new), fields(definition_id = %new.definition_id, mode = %new.mode))]
    pub async fn create_operation(&self, new: &NewOperation) -> Result<OperationRecord> {
        let now = Utc::now();
        let id = operation_id(&new.definition_id, now);

        sqlx::query(
            "INSERT INTO operations (
                id, definition_id, name, capability, action, target_resource,
                mode, status, current_step, total_steps, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 0, ?8, ?9)",
        )
        .bind(&id)
        .bind(&new.definition_id)
        .bind(&new.name)
        .bind(&new.capability)
        .bind(&new.action)
        .bind(&new.target_resource)
        .bind(new.mode.as_str())
        .bind(i64::from(new.total_steps))
        .bind(millis(now))
        .execute(&self.pool)
        .await?;

        tracing::info!(operation_id = %id, "Created operation");
        self.get_operation(&id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    pub async fn start_operation(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE operations SET status = 'running', started_at = ?2
             WHERE id = ?1 AND status = 'pending'",
        )
        .bind(id)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        self.ensure_transitioned(id, result.rows_affected(), OperationStatus::Running)
            .await
    }

    /// Advisory progress; ignored once the operation is terminal
    pub async fn update_progress(
        &self,
        id: &str,
        current_step: u32,
        total_steps: u32,
        label: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE operations SET current_step = ?2, total_steps = ?3, current_step_label = ?4
             WHERE id = ?1 AND status IN ('pending', 'running')",
        )
        .bind(id)
        .bind(i64::from(current_step))
        .bind(i64::from(total_steps))
        .bind(label)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_operation(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE operations SET status = 'completed', finished_at = ?2
             WHERE id = ?1 AND status IN ('pending', 'running')",
        )
        .bind(id)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        self.ensure_transitioned(id, result.rows_affected(), OperationStatus::Completed)
            .await
    }

    pub async fn fail_operation(&self, id: &str, error: &str, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE operations SET status = 'failed', error = ?2, finished_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'running')",
        )
        .bind(id)
        .bind(error)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        self.ensure_transitioned(id, result.rows_affected(), OperationStatus::Failed)
            .await
    }

    async fn ensure_transitioned(&self, id: &str, affected: u64, to: OperationStatus) -> Result<()> {
        if affected > 0 {
            tracing::debug!(operation_id = id, status = %to, "Operation transitioned");
            return Ok(());
        }
        match self.get_operation(id).await? {
            Some(current) => Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to,
            }),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    pub async fn get_operation(&self, id: &str) -> Result<Option<OperationRecord>> {
        sqlx::query_as::<_, OperationRow>("SELECT * FROM operations WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(OperationRecord::try_from)
            .transpose()
    }

    /// Append a log line; finished operations accept trailing lines too
    pub async fn append_log(&self, operation_id: &str, level: LogLevel, message: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO operation_logs (operation_id, level, message, logged_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(operation_id)
        .bind(level.as_str())
        .bind(message)
        .bind(millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn operation_logs(&self, operation_id: &str) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            "SELECT operation_id, level, message, logged_at FROM operation_logs
             WHERE operation_id = ?1 ORDER BY seq",
        )
        .bind(operation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LogEntry::try_from).collect()
    }

    /// Newest first
    pub async fn list_operations(
        &self,
        status: Option<OperationStatus>,
        limit: u32,
    ) -> Result<Vec<OperationRecord>> {
        let rows = sqlx::query_as::<_, OperationRow>(
            "SELECT * FROM operations
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OperationRecord::try_from).collect()
    }

    /// Non-terminal operations created before `before`
    pub async fn stale_operations(&self, before: DateTime<Utc>) -> Result<Vec<OperationRecord>> {
        let rows = sqlx::query_as::<_, OperationRow>(
            "SELECT * FROM operations
             WHERE status IN ('pending', 'running') AND created_at < ?1
             ORDER BY created_at",
        )
        .bind(millis(before))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OperationRecord::try_from).collect()
    }

    // ---------------------------------------------------------------------
    // Locks
    // ---------------------------------------------------------------------

    /// Take the advisory lease on `key`
    ///
    /// Succeeds when the key is free, the lease has expired, or the same
    /// operation already holds it.
    #[tracing::instrument(skip(self, now, lease))]
    pub async fn acquire_lock(
        &self,
        key: &str,
        operation_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO resource_locks (lock_key, operation_id, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (lock_key) DO UPDATE SET
                operation_id = excluded.operation_id,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
             WHERE resource_locks.expires_at <= excluded.acquired_at
                OR resource_locks.operation_id = excluded.operation_id",
        )
        .bind(key)
        .bind(operation_id)
        .bind(millis(now))
        .bind(millis(saturating_add(now, lease)))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::debug!("Acquired resource lock");
            return Ok(());
        }

        let holder = sqlx::query_scalar::<_, String>(
            "SELECT operation_id FROM resource_locks WHERE lock_key = ?1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or_default();
        tracing::warn!(holder = %holder, "Resource lock is held");
        Err(StoreError::LockHeld {
            key: key.to_string(),
            holder,
        })
    }

    pub async fn release_lock(&self, key: &str, operation_id: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM resource_locks WHERE lock_key = ?1 AND operation_id = ?2")
                .bind(key)
                .bind(operation_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn release_locks_for(&self, operation_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM resource_locks WHERE operation_id = ?1")
            .bind(operation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ---------------------------------------------------------------------
    // Aggregates
    // ---------------------------------------------------------------------

    /// Live resource counts per type
    pub async fn resource_counts_by_type(&self) -> Result<Vec<(String, u64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT resource_type, COUNT(*) FROM resources
             WHERE deleted_at IS NULL
             GROUP BY resource_type
             ORDER BY resource_type",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(kind, count)| (kind, count.max(0) as u64))
            .collect())
    }

    pub async fn failed_operations(&self, limit: u32) -> Result<Vec<OperationRecord>> {
        self.list_operations(Some(OperationStatus::Failed), limit)
            .await
    }

    pub async fn cache_stats(&self, now: DateTime<Utc>) -> Result<CacheStats> {
        let (fresh, stale, deleted) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT
                COALESCE(SUM(CASE WHEN deleted_at IS NULL AND cache_expires_at > ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN deleted_at IS NULL AND (cache_expires_at IS NULL OR cache_expires_at <= ?1) THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN deleted_at IS NOT NULL THEN 1 ELSE 0 END), 0)
             FROM resources",
        )
        .bind(millis(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(CacheStats {
            fresh: fresh.max(0) as u64,
            stale: stale.max(0) as u64,
            deleted: deleted.max(0) as u64,
        })
    }

    pub async fn operation_summary(&self) -> Result<OperationSummary> {
        let (pending, running, completed, failed, dry_runs) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
                "SELECT
                    COALESCE(SUM(CASE WHEN mode <> 'dry_run' AND status = 'pending' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN mode <> 'dry_run' AND status = 'running' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN mode <> 'dry_run' AND status = 'completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN mode <> 'dry_run' AND status = 'failed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN mode = 'dry_run' THEN 1 ELSE 0 END), 0)
                 FROM operations",
            )
            .fetch_one(&self.pool)
            .await?;
        Ok(OperationSummary {
            pending: pending.max(0) as u64,
            running: running.max(0) as u64,
            completed: completed.max(0) as u64,
            failed: failed.max(0) as u64,
            dry_runs: dry_runs.max(0) as u64,
        })
    }

    // ---------------------------------------------------------------------
    // Audit
    // ---------------------------------------------------------------------

    pub async fn record_audit(&self, kind: &str, subject: &str, detail: &str) -> Result<()> {
        self.record_audit_at(kind, subject, detail, Utc::now()).await
    }

    async fn record_audit_at(
        &self,
        kind: &str,
        subject: &str,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_events (kind, subject, detail, recorded_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(kind)
        .bind(subject)
        .bind(detail)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Newest first
    pub async fn audit_events(&self, limit: u32) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT * FROM audit_events ORDER BY id DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AuditEvent::from).collect())
    }
}

/// `{definition_id}-{YYYYMMDDHHMMSS}-{8 hex}`
fn operation_id(definition_id: &str, now: DateTime<Utc>) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        definition_id,
        now.format("%Y%m%d%H%M%S"),
        &random[..8]
    )
}

fn millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse<T: FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(StoreError::InvalidData)
}

#[derive(FromRow)]
struct ResourceRow {
    id: String,
    name: String,
    resource_type: String,
    subscription: Option<String>,
    resource_group: Option<String>,
    location: Option<String>,
    properties: String,
    status: String,
    last_validated_at: Option<i64>,
    cache_expires_at: Option<i64>,
    managed_by_toolkit: bool,
    deleted_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ResourceRow> for ResourceRecord {
    type Error = StoreError;

    fn try_from(row: ResourceRow) -> Result<Self> {
        let properties = serde_json::from_str(&row.properties)
            .map_err(|e| StoreError::InvalidData(format!("properties of {}: {e}", row.id)))?;
        Ok(Self {
            status: parse(&row.status)?,
            id: row.id,
            name: row.name,
            resource_type: row.resource_type,
            subscription: row.subscription,
            resource_group: row.resource_group,
            location: row.location,
            properties,
            last_validated_at: row.last_validated_at.map(from_millis),
            cache_expires_at: row.cache_expires_at.map(from_millis),
            managed_by_toolkit: row.managed_by_toolkit,
            deleted_at: row.deleted_at.map(from_millis),
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}

#[derive(FromRow)]
struct DependencyRow {
    dependent_id: String,
    dependency_id: String,
    dependency_type: String,
    relationship: Option<String>,
    created_at: i64,
}

impl TryFrom<DependencyRow> for DependencyEdge {
    type Error = StoreError;

    fn try_from(row: DependencyRow) -> Result<Self> {
        Ok(Self {
            dependency_type: parse(&row.dependency_type)?,
            dependent_id: row.dependent_id,
            dependency_id: row.dependency_id,
            relationship: row.relationship,
            created_at: from_millis(row.created_at),
        })
    }
}

#[derive(FromRow)]
struct OperationRow {
    id: String,
    definition_id: String,
    name: String,
    capability: Option<String>,
    action: Option<String>,
    target_resource: Option<String>,
    mode: String,
    status: String,
    current_step: i64,
    total_steps: i64,
    current_step_label: Option<String>,
    error: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
}

impl TryFrom<OperationRow> for OperationRecord {
    type Error = StoreError;

    fn try_from(row: OperationRow) -> Result<Self> {
        Ok(Self {
            mode: parse(&row.mode)?,
            status: parse(&row.status)?,
            id: row.id,
            definition_id: row.definition_id,
            name: row.name,
            capability: row.capability,
            action: row.action,
            target_resource: row.target_resource,
            current_step: u32::try_from(row.current_step).unwrap_or_default(),
            total_steps: u32::try_from(row.total_steps).unwrap_or_default(),
            current_step_label: row.current_step_label,
            error: row.error,
            created_at: from_millis(row.created_at),
            started_at: row.started_at.map(from_millis),
            finished_at: row.finished_at.map(from_millis),
        })
    }
}

#[derive(FromRow)]
struct LogRow {
    operation_id: String,
    level: String,
    message: String,
    logged_at: i64,
}

impl TryFrom<LogRow> for LogEntry {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self> {
        Ok(Self {
            level: parse(&row.level)?,
            operation_id: row.operation_id,
            message: row.message,
            logged_at: from_millis(row.logged_at),
        })
    }
}

#[derive(FromRow)]
struct AuditRow {
    id: i64,
    kind: String,
    subject: String,
    detail: String,
    recorded_at: i64,
}

impl From<AuditRow> for AuditEvent {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            subject: row.subject,
            detail: row.detail,
            recorded_at: from_millis(row.recorded_at),
        }
    }
}
