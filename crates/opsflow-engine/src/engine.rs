//! Operation execution engine
//!
//! Drives one definition through its lifecycle:
//!
//! ```text
//! resolve ─▶ pending ─▶ lease ─▶ prerequisites ─▶ running ─▶ steps ─┬─▶ completed
//!                         │            │                           │
//!                         └────────────┴──────────▶ failed ◀───────┴─ rollback
//! ```
//!
//! Every transition and step outcome is written to the operation log.

use crate::cache::{ResourceCache, TtlPolicy};
use crate::effector::{Effector, LiveProbe, ProbeResult};
use crate::error::{EngineError, Result};
use crate::outcome::{StepOutcome, run_step};
use crate::resolver::{DependencyResolver, Presence, UnmetReason};
use crate::rollback::{self, RollbackReport, ScriptContext};
use chrono::Utc;
use opsflow_core::{
    Definition, ResolvedOperation, ResolvedPrerequisite, ResolvedStep, Variables,
};
use opsflow_state::{
    DependencyEdge, DependencyType, LogLevel, NewOperation, OperationMode, OperationRecord,
    OperationStatus, ResourceRecord, ResourceScope, ResourceStatus, StateStore, StoreError,
    canonical_id,
};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Engine-wide settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Where rollback scripts are written
    pub rollback_dir: PathBuf,
    /// Lease length of the per-resource advisory lock
    pub lock_lease: chrono::Duration,
    /// Subscription used to scope target and prerequisite resources
    pub subscription: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rollback_dir: PathBuf::from(".opsflow/rollback"),
            lock_lease: chrono::Duration::hours(1),
            subscription: None,
        }
    }
}

/// Why an operation ended in `failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// A declared prerequisite is not satisfied
    Prerequisite {
        resource_type: String,
        name: String,
        scope: String,
        reason: UnmetReason,
    },
    /// A stored dependency of the target is not satisfied
    Dependency {
        resource_id: String,
        dependency_id: String,
        reason: UnmetReason,
    },
    /// A step failed without `continue_on_error`
    Step {
        step: String,
        exit_code: Option<i32>,
        message: String,
    },
    /// Another operation holds the target's lease
    Lock { key: String, holder: String },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Prerequisite {
                resource_type,
                name,
                scope,
                reason,
            } => write!(
                f,
                "prerequisite {resource_type} '{name}' ({scope}) is not satisfied: {reason}"
            ),
            Failure::Dependency {
                resource_id,
                dependency_id,
                reason,
            } => write!(
                f,
                "dependency {dependency_id} of {resource_id} is not satisfied: {reason}"
            ),
            Failure::Step { step, message, .. } => write!(f, "step '{step}' failed: {message}"),
            Failure::Lock { key, holder } => {
                write!(f, "resource {key} is locked by operation {holder}")
            }
        }
    }
}

/// What would run (or ran), fully rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub definition_id: String,
    pub name: String,
    pub target_resource: Option<String>,
    pub prerequisites: Vec<ResolvedPrerequisite>,
    pub steps: Vec<ResolvedStep>,
    pub rollback: Vec<ResolvedStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub operation_id: String,
    pub status: OperationStatus,
    pub mode: OperationMode,
    pub plan: ExecutionPlan,
    pub steps: Vec<StepOutcome>,
    pub rollback: Option<RollbackReport>,
    pub rollback_script: Option<PathBuf>,
    pub failure: Option<Failure>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Completed
    }

    fn new(operation: &OperationRecord, plan: ExecutionPlan) -> Self {
        Self {
            operation_id: operation.id.clone(),
            status: operation.status,
            mode: operation.mode,
            plan,
            steps: Vec::new(),
            rollback: None,
            rollback_script: None,
            failure: None,
        }
    }
}

pub struct Engine {
    store: StateStore,
    cache: ResourceCache,
    resolver: DependencyResolver,
    effector: Arc<dyn Effector>,
    probe: LiveProbe,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        store: StateStore,
        effector: Arc<dyn Effector>,
        probe: LiveProbe,
        policy: TtlPolicy,
        settings: EngineSettings,
    ) -> Self {
        let cache = ResourceCache::new(store.clone(), policy);
        let resolver = DependencyResolver::new(cache.clone(), effector.clone(), probe.clone());
        Self {
            store,
            cache,
            resolver,
            effector,
            probe,
            settings,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub fn effector(&self) -> &dyn Effector {
        self.effector.as_ref()
    }

    pub fn probe(&self) -> &LiveProbe {
        &self.probe
    }

    /// Execute a definition
    ///
    /// Definition errors return before any operation row exists. Store
    /// errors are fatal: the row is marked failed when possible and the
    /// error is returned. Every other failure is reported in the
    /// [`ExecutionReport`] with the row in `failed`.
    #[tracing::instrument(skip_all, fields(definition_id = %definition.operation.id, %mode))]
    pub async fn execute(
        &self,
        definition: &Definition,
        variables: &Variables,
        mode: OperationMode,
    ) -> Result<ExecutionReport> {
        let resolved = definition.resolve(variables)?;
        let target_scope = self.scope(
            resolved
                .target
                .as_ref()
                .and_then(|t| t.resource_group.clone()),
        );
        let target_id = resolved
            .target
            .as_ref()
            .map(|t| canonical_id(&resolved.resource_type, &t.name, &target_scope));

        let plan = ExecutionPlan {
            definition_id: resolved.id.clone(),
            name: resolved.name.clone(),
            target_resource: target_id.clone(),
            prerequisites: resolved.prerequisites.clone(),
            steps: resolved.steps.clone(),
            rollback: resolved.rollback.clone(),
        };

        let operation = self
            .store
            .create_operation(&NewOperation {
                definition_id: resolved.id.clone(),
                name: resolved.name.clone(),
                capability: resolved.capability.clone(),
                action: resolved.action.clone(),
                target_resource: target_id.clone(),
                mode,
                total_steps: u32::try_from(resolved.steps.len()).unwrap_or(u32::MAX),
            })
            .await?;

        let lock_key = target_id.unwrap_or_else(|| format!("definition/{}", resolved.id));
        let mut run = Run {
            engine: self,
            operation: &operation,
            resolved: &resolved,
            target_scope,
            lock_key,
            report: ExecutionReport::new(&operation, plan),
        };

        match run.drive().await {
            Ok(()) => Ok(run.report),
            Err(e) => {
                tracing::error!(operation_id = %operation.id, error = %e, "Operation aborted by a fatal error");
                let message = format!("fatal error: {e}");
                if let Err(mark) = self
                    .store
                    .fail_operation(&operation.id, &message, Utc::now())
                    .await
                {
                    tracing::error!(error = %mark, "Could not mark operation failed");
                }
                if let Err(release) = self.store.release_locks_for(&operation.id).await {
                    tracing::error!(error = %release, "Could not release operation locks");
                }
                Err(e)
            }
        }
    }

    fn scope(&self, resource_group: Option<String>) -> ResourceScope {
        ResourceScope::new(self.settings.subscription.clone(), resource_group)
    }
}

/// State of one execution in flight
struct Run<'a> {
    engine: &'a Engine,
    operation: &'a OperationRecord,
    resolved: &'a ResolvedOperation,
    target_scope: ResourceScope,
    lock_key: String,
    report: ExecutionReport,
}

impl Run<'_> {
    fn store(&self) -> &StateStore {
        &self.engine.store
    }

    fn id(&self) -> &str {
        &self.operation.id
    }

    async fn log(&self, level: LogLevel, message: impl AsRef<str>) -> Result<()> {
        let message = message.as_ref();
        match level {
            LogLevel::Info => tracing::info!(operation_id = %self.id(), "{message}"),
            LogLevel::Warn => tracing::warn!(operation_id = %self.id(), "{message}"),
            LogLevel::Error => tracing::error!(operation_id = %self.id(), "{message}"),
        }
        self.store().append_log(self.id(), level, message).await?;
        Ok(())
    }

    async fn drive(&mut self) -> Result<()> {
        let mode = self.operation.mode;
        self.log(
            LogLevel::Info,
            format!(
                "operation created: {} ({} steps, mode {mode})",
                self.resolved.id,
                self.resolved.steps.len()
            ),
        )
        .await?;

        let locked = mode != OperationMode::DryRun;
        if locked {
            let acquired = self
                .store()
                .acquire_lock(&self.lock_key, self.id(), Utc::now(), self.engine.settings.lock_lease)
                .await;
            match acquired {
                Ok(()) => {}
                Err(StoreError::LockHeld { key, holder }) => {
                    return self.fail(Failure::Lock { key, holder }, false).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let result = self.drive_locked(mode).await;
        if locked {
            self.store().release_lock(&self.lock_key, self.id()).await?;
        }
        result
    }

    async fn drive_locked(&mut self, mode: OperationMode) -> Result<()> {
        let resolved = self.resolved;
        let mut prerequisites = Vec::new();
        if mode == OperationMode::Force {
            self.log(LogLevel::Warn, "force mode: prerequisite checks skipped")
                .await?;
        } else {
            match self.check_prerequisites().await? {
                Ok(found) => prerequisites = found,
                Err(failure) => return self.fail(failure, false).await,
            }
        }

        if mode == OperationMode::DryRun {
            for (i, step) in resolved.steps.iter().enumerate() {
                self.log(
                    LogLevel::Info,
                    format!(
                        "dry run: step {}/{} {}: {}",
                        i + 1,
                        resolved.steps.len(),
                        step.name,
                        step.command
                    ),
                )
                .await?;
            }
            self.log(LogLevel::Info, "dry run: no steps executed").await?;
            self.store().complete_operation(self.id(), Utc::now()).await?;
            self.report.status = OperationStatus::Completed;
            return Ok(());
        }

        self.store().start_operation(self.id(), Utc::now()).await?;
        self.report.status = OperationStatus::Running;

        let total = u32::try_from(resolved.steps.len()).unwrap_or(u32::MAX);
        for (i, step) in resolved.steps.iter().enumerate() {
            let index = u32::try_from(i + 1).unwrap_or(u32::MAX);
            self.store()
                .update_progress(self.id(), index, total, &step.name)
                .await?;
            self.log(
                LogLevel::Info,
                format!("step {index}/{total} {}: {}", step.name, step.command),
            )
            .await?;

            let outcome = run_step(self.engine.effector.as_ref(), step).await;
            let succeeded = outcome.success;
            let message = outcome.failure_message();
            let exit_code = outcome.exit_code;
            self.report.steps.push(outcome);

            if succeeded {
                self.log(LogLevel::Info, format!("step {index}/{total} {} succeeded", step.name))
                    .await?;
            } else if step.continue_on_error {
                self.log(
                    LogLevel::Warn,
                    format!(
                        "step {index}/{total} {} failed ({message}), continuing",
                        step.name
                    ),
                )
                .await?;
            } else {
                let failure = Failure::Step {
                    step: step.name.clone(),
                    exit_code,
                    message,
                };
                return self.fail(failure, true).await;
            }
        }

        self.finish(&prerequisites).await
    }

    /// Verify every prerequisite; returns the located records or the first failure
    async fn check_prerequisites(
        &self,
    ) -> Result<std::result::Result<Vec<(ResourceRecord, bool)>, Failure>> {
        let mut found = Vec::new();

        for prerequisite in &self.resolved.prerequisites {
            let scope = self.engine.scope(prerequisite.resource_group.clone());
            let presence = self
                .engine
                .resolver
                .locate(&prerequisite.resource_type, &prerequisite.name, &scope)
                .await?;

            let reason = match presence {
                Presence::Present(record)
                    if prerequisite.required && record.status == ResourceStatus::Failed =>
                {
                    Some(UnmetReason::Failed)
                }
                Presence::Present(record) => {
                    found.push((record, prerequisite.required));
                    None
                }
                Presence::Absent(reason) => Some(reason),
            };

            match reason {
                Some(reason) if prerequisite.required => {
                    return Ok(Err(Failure::Prerequisite {
                        resource_type: prerequisite.resource_type.clone(),
                        name: prerequisite.name.clone(),
                        scope: scope.to_string(),
                        reason,
                    }));
                }
                Some(reason) => {
                    self.log(
                        LogLevel::Warn,
                        format!(
                            "optional prerequisite {} '{}' is not available: {reason}",
                            prerequisite.resource_type, prerequisite.name
                        ),
                    )
                    .await?;
                }
                None => {
                    self.log(
                        LogLevel::Info,
                        format!(
                            "prerequisite {} '{}' satisfied",
                            prerequisite.resource_type, prerequisite.name
                        ),
                    )
                    .await?;
                }
            }
        }

        if let Some(target_id) = &self.report.plan.target_resource
            && self.store().get_resource(target_id).await?.is_some()
        {
            let satisfaction = self.engine.resolver.check_satisfied(target_id).await?;
            if let Some(unmet) = satisfaction.unmet.into_iter().next() {
                return Ok(Err(Failure::Dependency {
                    resource_id: target_id.clone(),
                    dependency_id: unmet.dependency_id,
                    reason: unmet.reason,
                }));
            }
        }

        Ok(Ok(found))
    }

    /// Success path: refresh the target and record its edges
    async fn finish(&mut self, prerequisites: &[(ResourceRecord, bool)]) -> Result<()> {
        let resolved = self.resolved;
        let resource_type = &resolved.resource_type;
        self.engine
            .cache
            .invalidate(resource_type, &format!("operation {} completed", self.id()))
            .await?;

        if let (Some(target), Some(target_id)) =
            (&resolved.target, self.report.plan.target_resource.clone())
        {
            if resolved.removes_resource() {
                if self.store().soft_delete_resource(&target_id, Utc::now()).await? {
                    self.log(LogLevel::Info, format!("target {target_id} marked deleted"))
                        .await?;
                }
            } else {
                let observed = match self
                    .engine
                    .probe
                    .probe(
                        self.engine.effector.as_ref(),
                        resource_type,
                        &target.name,
                        &self.target_scope,
                    )
                    .await?
                {
                    ProbeResult::Found(record) => Some(record),
                    ProbeResult::NotFound => {
                        self.log(
                            LogLevel::Warn,
                            format!("target {target_id} was not found after the operation"),
                        )
                        .await?;
                        None
                    }
                    // No way to look: record what the successful steps imply
                    ProbeResult::Unavailable => Some(
                        ResourceRecord::new(resource_type, &target.name, &self.target_scope)
                            .with_status(ResourceStatus::Succeeded),
                    ),
                };

                if let Some(record) = observed {
                    let record = record.managed(resolved.creates_resource());
                    let stored = self.engine.cache.store(record).await?;
                    self.log(
                        LogLevel::Info,
                        format!("target {} recorded ({})", stored.id, stored.status),
                    )
                    .await?;

                    for (prerequisite, required) in prerequisites {
                        if prerequisite.id == stored.id {
                            continue;
                        }
                        let dependency_type = if *required {
                            DependencyType::Required
                        } else {
                            DependencyType::Optional
                        };
                        self.store()
                            .add_dependency(
                                &DependencyEdge::new(&stored.id, &prerequisite.id, dependency_type)
                                    .with_relationship("prerequisite"),
                            )
                            .await?;
                    }
                }
            }
        }

        self.store().complete_operation(self.id(), Utc::now()).await?;
        self.report.status = OperationStatus::Completed;
        self.log(LogLevel::Info, "operation completed").await?;
        Ok(())
    }

    /// Close the operation as failed, rolling back when steps have run
    async fn fail(&mut self, failure: Failure, roll_back: bool) -> Result<()> {
        let resolved = self.resolved;
        self.log(LogLevel::Error, failure.to_string()).await?;

        if roll_back {
            let report = rollback::run(self.engine.effector.as_ref(), &resolved.rollback).await;
            for outcome in &report.attempted {
                let (level, verdict) = if outcome.success {
                    (LogLevel::Info, "succeeded".to_string())
                } else {
                    (LogLevel::Warn, format!("failed: {}", outcome.failure_message()))
                };
                self.log(level, format!("rollback {}: {verdict}", outcome.name))
                    .await?;
            }

            let context = ScriptContext {
                operation_id: self.id().to_string(),
                definition_id: resolved.id.clone(),
                failed_step: match &failure {
                    Failure::Step { step, .. } => Some(step.clone()),
                    _ => None,
                },
                generated_at: Utc::now(),
            };
            match rollback::write_script(
                &self.engine.settings.rollback_dir,
                &context,
                &resolved.rollback,
            ) {
                Ok(path) => {
                    self.log(
                        LogLevel::Info,
                        format!("rollback script written to {}", path.display()),
                    )
                    .await?;
                    self.report.rollback_script = Some(path);
                }
                Err(e) => {
                    self.log(LogLevel::Error, format!("could not write rollback script: {e}"))
                        .await?;
                }
            }
            self.report.rollback = Some(report);

            self.engine
                .cache
                .invalidate(
                    &resolved.resource_type,
                    &format!("operation {} failed", self.id()),
                )
                .await?;
        }

        self.store()
            .fail_operation(self.id(), &failure.to_string(), Utc::now())
            .await?;
        self.report.status = OperationStatus::Failed;
        self.report.failure = Some(failure);
        Ok(())
    }
}

impl From<&opsflow_config::OpsConfig> for EngineSettings {
    fn from(config: &opsflow_config::OpsConfig) -> Self {
        Self {
            rollback_dir: config.state.rollback_dir.clone(),
            lock_lease: opsflow_state::span_from_secs(config.locks.lease_secs),
            subscription: config.subscription.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages() {
        let failure = Failure::Prerequisite {
            resource_type: "virtual-network".to_string(),
            name: "net-A".to_string(),
            scope: "-/rg".to_string(),
            reason: UnmetReason::NotFoundLive,
        };
        assert_eq!(
            failure.to_string(),
            "prerequisite virtual-network 'net-A' (-/rg) is not satisfied: not found live"
        );

        let failure = Failure::Step {
            step: "create-Y".to_string(),
            exit_code: Some(1),
            message: "exit code 1".to_string(),
        };
        assert_eq!(failure.to_string(), "step 'create-Y' failed: exit code 1");
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = opsflow_config::OpsConfig::default();
        config.subscription = Some("sub".to_string());
        config.locks.lease_secs = 90;
        let settings = EngineSettings::from(&config);
        assert_eq!(settings.lock_lease, chrono::Duration::seconds(90));
        assert_eq!(settings.subscription.as_deref(), Some("sub"));

        config.locks.lease_secs = u64::MAX;
        let settings = EngineSettings::from(&config);
        assert_eq!(settings.lock_lease, chrono::Duration::MAX);
    }
}
