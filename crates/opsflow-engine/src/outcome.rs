//! Step execution outcomes

use crate::effector::Effector;
use opsflow_core::{CommandLine, ResolvedStep};
use serde::Serialize;

/// Result of running one step (or rollback step)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub name: String,
    pub command: CommandLine,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Set when the effector could not run the command at all
    pub error: Option<String>,
}

impl StepOutcome {
    /// Human readable failure reason
    pub fn failure_message(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        let stderr = self.stderr.trim();
        match (self.exit_code, stderr.is_empty()) {
            (Some(code), true) => format!("exit code {code}"),
            (Some(code), false) => format!("exit code {code}: {stderr}"),
            (None, true) => "terminated by signal".to_string(),
            (None, false) => format!("terminated by signal: {stderr}"),
        }
    }
}

/// Run a step through the effector
///
/// Effector errors become a failed outcome; they never abort the caller.
pub async fn run_step(effector: &dyn Effector, step: &ResolvedStep) -> StepOutcome {
    match effector.invoke(&step.command).await {
        Ok(output) => StepOutcome {
            name: step.name.clone(),
            command: step.command.clone(),
            success: output.success(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            error: None,
        },
        Err(e) => StepOutcome {
            name: step.name.clone(),
            command: step.command.clone(),
            exit_code: None,
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(e.to_string()),
        },
    }
}
