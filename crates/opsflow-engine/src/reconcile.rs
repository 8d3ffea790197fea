//! Startup reconciliation
//!
//! An operation left in `pending` or `running` longer than the configured
//! window was orphaned by a crashed or killed process. It is closed as
//! failed and its leases are released so the target can be operated on again.

use crate::error::Result;
use chrono::{DateTime, Utc};
use opsflow_state::{LogLevel, StateStore, StoreError};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Operations moved to `failed`
    pub reconciled: Vec<String>,
    pub released_locks: u64,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.reconciled.is_empty()
    }
}

/// Fail every non-terminal operation created before `now - stale_after`
#[tracing::instrument(skip(store))]
pub async fn reconcile(
    store: &StateStore,
    stale_after: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    let message = format!(
        "reconciliation: orphaned operation (no terminal state after {}s)",
        stale_after.num_seconds()
    );

    let cutoff = opsflow_state::saturating_sub(now, stale_after);
    for operation in store.stale_operations(cutoff).await? {
        match store.fail_operation(&operation.id, &message, now).await {
            Ok(()) => {}
            // Finished concurrently
            Err(StoreError::InvalidTransition { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
        report.released_locks += store.release_locks_for(&operation.id).await?;
        store
            .append_log(&operation.id, LogLevel::Error, &message)
            .await?;
        store
            .record_audit("operation_reconciled", &operation.id, &message)
            .await?;

        tracing::warn!(
            operation_id = %operation.id,
            status = %operation.status,
            "Reconciled orphaned operation"
        );
        report.reconciled.push(operation.id);
    }

    if !report.is_empty() {
        tracing::info!(count = report.reconciled.len(), "Reconciliation finished");
    }
    Ok(report)
}
