//! Rollback manager
//!
//! Compensating steps run in reverse declaration order. A failing rollback
//! step never stops the ones after it. The same steps are also written out as
//! a bash script an operator can inspect and replay by hand.

use crate::effector::Effector;
use crate::outcome::{StepOutcome, run_step};
use chrono::{DateTime, Utc};
use opsflow_core::ResolvedStep;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// A rollback step that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackFailure {
    pub step: String,
    pub message: String,
}

impl std::fmt::Display for RollbackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rollback step '{}' failed: {}", self.step, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// In execution order (reverse of declaration)
    pub attempted: Vec<StepOutcome>,
    pub failures: Vec<RollbackFailure>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Header information for a rollback script
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub operation_id: String,
    pub definition_id: String,
    pub failed_step: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Run rollback steps in reverse order, best effort
pub async fn run(effector: &dyn Effector, steps: &[ResolvedStep]) -> RollbackReport {
    let mut report = RollbackReport::default();

    for step in steps.iter().rev() {
        tracing::info!(step = %step.name, command = %step.command, "Running rollback step");
        let outcome = run_step(effector, step).await;
        if !outcome.success {
            let failure = RollbackFailure {
                step: step.name.clone(),
                message: outcome.failure_message(),
            };
            tracing::warn!(step = %step.name, error = %failure.message, "Rollback step failed");
            report.failures.push(failure);
        }
        report.attempted.push(outcome);
    }

    report
}

/// Render the replayable bash script
///
/// Every argument is single-quoted. There is no `set -e`: each step reports
/// its own failure on stderr and the script carries on.
pub fn render_script(context: &ScriptContext, steps: &[ResolvedStep]) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "#!/usr/bin/env bash");
    let _ = writeln!(script, "# opsflow rollback script");
    let _ = writeln!(script, "# operation:   {}", comment_safe(&context.operation_id));
    let _ = writeln!(script, "# definition:  {}", comment_safe(&context.definition_id));
    let _ = writeln!(
        script,
        "# failed step: {}",
        context
            .failed_step
            .as_deref()
            .map(comment_safe)
            .unwrap_or_else(|| "-".to_string())
    );
    let _ = writeln!(script, "# generated:   {}", context.generated_at.to_rfc3339());
    let _ = writeln!(script, "#");
    let _ = writeln!(script, "# Steps are listed in the order they should run (reverse of declaration).");

    if steps.is_empty() {
        let _ = writeln!(script);
        let _ = writeln!(script, "# no rollback steps are defined for this operation");
        return script;
    }

    let total = steps.len();
    for (i, step) in steps.iter().rev().enumerate() {
        let argv = step
            .command
            .argv()
            .iter()
            .map(|arg| single_quote(arg))
            .collect::<Vec<_>>()
            .join(" ");
        let message = single_quote(&format!("rollback step failed: {}", step.name));
        let _ = writeln!(script);
        let _ = writeln!(script, "# [{}/{}] {}", i + 1, total, comment_safe(&step.name));
        let _ = writeln!(script, "{argv} || echo {message} >&2");
    }

    script
}

/// Write `{dir}/{operation_id}.sh` and make it executable
pub fn write_script(
    dir: &Path,
    context: &ScriptContext,
    steps: &[ResolvedStep],
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.sh", context.operation_id));
    std::fs::write(&path, render_script(context, steps))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }

    tracing::info!(path = %path.display(), steps = steps.len(), "Wrote rollback script");
    Ok(path)
}

fn single_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn comment_safe(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsflow_core::CommandLine;

    fn step(name: &str, argv: &[&str]) -> ResolvedStep {
        ResolvedStep {
            name: name.to_string(),
            command: CommandLine::new(argv.iter().map(|s| s.to_string()).collect()).unwrap(),
            continue_on_error: false,
        }
    }

    fn context() -> ScriptContext {
        ScriptContext {
            operation_id: "vnet-create-20250101000000-abcdef01".to_string(),
            definition_id: "vnet-create".to_string(),
            failed_step: Some("create subnet".to_string()),
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_script_reverse_and_quoted() {
        let steps = vec![
            step("delete-X", &["az", "delete", "x"]),
            step("delete-Y", &["az", "delete", "it's y"]),
        ];
        let script = render_script(&context(), &steps);

        assert!(script.starts_with("#!/usr/bin/env bash\n"));
        assert!(script.contains("# operation:   vnet-create-20250101000000-abcdef01"));
        assert!(script.contains("# failed step: create subnet"));
        assert!(!script.contains("set -e"));

        let y = script.find("'az' 'delete' 'it'\\''s y'").unwrap();
        let x = script.find("'az' 'delete' 'x'").unwrap();
        assert!(y < x, "rollback must be in reverse order:\n{script}");
        assert!(script.contains("|| echo 'rollback step failed: delete-X' >&2"));
    }

    #[test]
    fn test_render_script_without_steps() {
        let script = render_script(&context(), &[]);
        assert!(script.contains("no rollback steps"));
    }

    #[test]
    fn test_write_script() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("rollback");
        let path = write_script(&dir, &context(), &[step("delete-X", &["true"])]).unwrap();

        assert_eq!(path, dir.join("vnet-create-20250101000000-abcdef01.sh"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("'true' || echo"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }
}
