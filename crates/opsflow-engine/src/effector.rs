//! Effector: the external command surface that changes cloud state
//!
//! Commands are always typed argv; nothing is passed through a shell.

use crate::error::EffectorError;
use async_trait::async_trait;
use opsflow_core::{CommandLine, DefinitionError, Variables, render_str};
use opsflow_state::{ResourceRecord, ResourceScope};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectorOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl EffectorOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// External command surface
///
/// `Err` is returned only when the command could not be run at all.
#[async_trait]
pub trait Effector: Send + Sync {
    /// Effector name for logs (e.g., "process")
    fn name(&self) -> &str;

    /// Run a command and capture its output
    async fn invoke(&self, command: &CommandLine) -> Result<EffectorOutput, EffectorError>;
}

/// Runs commands as local child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessEffector {
    timeout: Option<Duration>,
}

impl ProcessEffector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Effector for ProcessEffector {
    fn name(&self) -> &str {
        "process"
    }

    async fn invoke(&self, command: &CommandLine) -> Result<EffectorOutput, EffectorError> {
        let mut cmd = Command::new(command.program());
        cmd.args(command.args());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(command = %command, "Running effector command");

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, cmd.output()).await {
                Ok(output) => output,
                Err(_) => {
                    return Err(EffectorError::Timeout {
                        program: command.program().to_string(),
                        secs: timeout.as_secs(),
                    });
                }
            },
            None => cmd.output().await,
        }
        .map_err(|source| EffectorError::Spawn {
            program: command.program().to_string(),
            source,
        })?;

        Ok(EffectorOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Outcome of a live existence check
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeResult {
    Found(ResourceRecord),
    NotFound,
    /// No probe is configured or the effector could not be run
    Unavailable,
}

/// Live resource lookups through configured command templates
///
/// Templates are argv lists rendered with the configured variables plus
/// `RESOURCE_TYPE`, `RESOURCE_NAME`, `RESOURCE_GROUP` and `SUBSCRIPTION`.
#[derive(Debug, Clone, Default)]
pub struct LiveProbe {
    probe: Option<Vec<String>>,
    list: Option<Vec<String>>,
    variables: Variables,
}

impl LiveProbe {
    pub fn new(probe: Option<Vec<String>>, list: Option<Vec<String>>, variables: Variables) -> Self {
        Self {
            probe,
            list,
            variables,
        }
    }

    /// A probe that never reaches the cloud
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn can_probe(&self) -> bool {
        self.probe.is_some()
    }

    pub fn can_list(&self) -> bool {
        self.list.is_some()
    }

    /// Look a single resource up
    ///
    /// Exit 0 means the resource exists; JSON on stdout becomes its properties.
    pub async fn probe(
        &self,
        effector: &dyn Effector,
        resource_type: &str,
        name: &str,
        scope: &ResourceScope,
    ) -> Result<ProbeResult, DefinitionError> {
        let Some(template) = &self.probe else {
            return Ok(ProbeResult::Unavailable);
        };
        let command = self.render(template, Some((resource_type, name)), scope)?;

        match effector.invoke(&command).await {
            Ok(output) if output.success() => {
                let properties = parse_single(&output.stdout);
                let record = ResourceRecord::new(resource_type, name, scope).with_properties(properties);
                tracing::debug!(resource_type, name, status = %record.status, "Resource found live");
                Ok(ProbeResult::Found(record))
            }
            Ok(output) => {
                tracing::debug!(resource_type, name, exit_code = ?output.exit_code, "Resource not found live");
                Ok(ProbeResult::NotFound)
            }
            Err(e) => {
                tracing::warn!(error = %e, resource_type, name, "Live probe could not run");
                Ok(ProbeResult::Unavailable)
            }
        }
    }

    /// List every resource in a scope
    ///
    /// Returns `None` when listing is not configured or the command failed.
    /// Each element of the JSON array needs `name`; `type` and `location` are optional.
    pub async fn list(
        &self,
        effector: &dyn Effector,
        scope: &ResourceScope,
    ) -> Result<Option<Vec<ResourceRecord>>, DefinitionError> {
        let Some(template) = &self.list else {
            return Ok(None);
        };
        let command = self.render(template, None, scope)?;

        let output = match effector.invoke(&command).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                tracing::warn!(exit_code = ?output.exit_code, stderr = %output.stderr.trim(), "Resource listing failed");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Resource listing could not run");
                return Ok(None);
            }
        };

        let items = match serde_json::from_str::<serde_json::Value>(&output.stdout) {
            Ok(serde_json::Value::Array(items)) => items,
            Ok(_) | Err(_) if output.stdout.trim().is_empty() => Vec::new(),
            Ok(_) => {
                tracing::warn!("Resource listing did not return a JSON array");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Resource listing returned invalid JSON");
                return Ok(None);
            }
        };

        let records = items
            .into_iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?.to_string();
                let resource_type = item
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                Some(ResourceRecord::new(resource_type, name, scope).with_properties(item))
            })
            .collect();
        Ok(Some(records))
    }

    fn render(
        &self,
        template: &[String],
        resource: Option<(&str, &str)>,
        scope: &ResourceScope,
    ) -> Result<CommandLine, DefinitionError> {
        let mut variables = self.variables.clone();
        if let Some((resource_type, name)) = resource {
            variables.insert("RESOURCE_TYPE".to_string(), resource_type.to_string());
            variables.insert("RESOURCE_NAME".to_string(), name.to_string());
        }
        variables.insert(
            "RESOURCE_GROUP".to_string(),
            scope.resource_group.clone().unwrap_or_default(),
        );
        if let Some(subscription) = &scope.subscription {
            variables.insert("SUBSCRIPTION".to_string(), subscription.clone());
        } else {
            variables.entry("SUBSCRIPTION".to_string()).or_default();
        }

        let argv = template
            .iter()
            .map(|arg| render_str(arg, &variables))
            .collect::<Result<Vec<_>, _>>()?;
        CommandLine::new(argv)
            .ok_or_else(|| DefinitionError::EmptyCommand("probe".to_string()))
    }
}

/// Properties from probe output: an object, or the first element of an array
fn parse_single(stdout: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(stdout) {
        Ok(serde_json::Value::Array(mut items)) if !items.is_empty() => items.swap_remove(0),
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => serde_json::Value::Object(Default::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsflow_state::ResourceStatus;

    fn cmd(argv: &[&str]) -> CommandLine {
        CommandLine::new(argv.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[tokio::test]
    async fn test_process_effector_captures_output() {
        let effector = ProcessEffector::new();
        let output = effector
            .invoke(&cmd(&["sh", "-c", "echo out; echo err >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_process_effector_does_not_use_a_shell() {
        let effector = ProcessEffector::new();
        let output = effector
            .invoke(&cmd(&["echo", "$(whoami); rm -rf /"]))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "$(whoami); rm -rf /");
    }

    #[tokio::test]
    async fn test_process_effector_missing_program() {
        let effector = ProcessEffector::new();
        let result = effector
            .invoke(&cmd(&["opsflow-definitely-missing-program"]))
            .await;
        assert!(matches!(result, Err(EffectorError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_process_effector_timeout() {
        let effector = ProcessEffector::new().with_timeout(Duration::from_millis(100));
        let result = effector.invoke(&cmd(&["sleep", "5"])).await;
        assert!(matches!(result, Err(EffectorError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_probe_renders_template() {
        let probe = LiveProbe::new(
            Some(vec![
                "echo".to_string(),
                r#"{"name": "${RESOURCE_NAME}", "provisioningState": "Succeeded", "rg": "${RESOURCE_GROUP}"}"#
                    .to_string(),
            ]),
            None,
            Variables::new(),
        );
        let scope = ResourceScope::resource_group("rg-app");
        let result = probe
            .probe(&ProcessEffector::new(), "vnet", "vnet-01", &scope)
            .await
            .unwrap();
        match result {
            ProbeResult::Found(record) => {
                assert_eq!(record.name, "vnet-01");
                assert_eq!(record.status, ResourceStatus::Succeeded);
                assert_eq!(record.properties["rg"], "rg-app");
            }
            other => panic!("Expected found, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_not_found_and_disabled() {
        let probe = LiveProbe::new(Some(vec!["false".to_string()]), None, Variables::new());
        let scope = ResourceScope::default();
        assert_eq!(
            probe
                .probe(&ProcessEffector::new(), "vnet", "x", &scope)
                .await
                .unwrap(),
            ProbeResult::NotFound
        );
        assert_eq!(
            LiveProbe::disabled()
                .probe(&ProcessEffector::new(), "vnet", "x", &scope)
                .await
                .unwrap(),
            ProbeResult::Unavailable
        );
    }

    #[test]
    fn test_parse_single() {
        assert_eq!(parse_single(r#"[{"a": 1}, {"a": 2}]"#)["a"], 1);
        assert_eq!(parse_single(r#"{"a": 3}"#)["a"], 3);
        assert!(parse_single("not json").as_object().unwrap().is_empty());
    }
}
