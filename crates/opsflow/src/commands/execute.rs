use crate::context::Context;
use colored::Colorize;
use opsflow_core::Definition;
use opsflow_engine::{ExecutionReport, Failure};
use opsflow_state::{OperationMode, OperationStatus};
use std::path::Path;

pub async fn handle(
    mut ctx: Context,
    definition_path: &Path,
    dry_run: bool,
    force: bool,
    vars: &[String],
) -> anyhow::Result<()> {
    ctx.config.merge_overrides(vars)?;
    ctx.print_config_source();

    let definition = Definition::load(definition_path)?;
    let mode = if dry_run {
        OperationMode::DryRun
    } else if force {
        OperationMode::Force
    } else {
        OperationMode::Normal
    };

    println!(
        "{} {} ({})",
        "操作を実行中:".blue(),
        definition.operation.name.bold(),
        definition.operation.id.cyan()
    );
    if mode == OperationMode::Force {
        println!("{}", "⚠ --force: 前提条件のチェックをスキップします".yellow());
    }

    let engine = ctx.engine();
    let report = engine
        .execute(&definition, &ctx.config.variables, mode)
        .await?;

    println!("操作ID: {}", report.operation_id.cyan());
    if mode == OperationMode::DryRun {
        print_plan(&report);
    } else {
        print_steps(&report);
    }

    match report.status {
        OperationStatus::Completed => {
            println!();
            let message = if mode == OperationMode::DryRun {
                "✓ ドライラン完了（コマンドは実行されていません）"
            } else {
                "✓ 操作が完了しました"
            };
            println!("{}", message.green().bold());
            Ok(())
        }
        _ => {
            print_failure(&report);
            std::process::exit(1);
        }
    }
}

fn print_plan(report: &ExecutionReport) {
    let plan = &report.plan;
    println!();
    if let Some(target) = &plan.target_resource {
        println!("対象リソース: {}", target.cyan());
    }
    if !plan.prerequisites.is_empty() {
        println!("前提リソース:");
        for prerequisite in &plan.prerequisites {
            let kind = if prerequisite.required {
                "required"
            } else {
                "optional"
            };
            println!(
                "  • {} {} ({})",
                prerequisite.resource_type,
                prerequisite.name.cyan(),
                kind.dimmed()
            );
        }
    }
    println!("ステップ:");
    for (i, step) in plan.steps.iter().enumerate() {
        println!("  {}. {}", i + 1, step.name.bold());
        println!("     {}", step.command.to_shell().dimmed());
    }
    if !plan.rollback.is_empty() {
        println!("ロールバック（逆順に実行）:");
        for step in plan.rollback.iter().rev() {
            println!("  • {}", step.name);
            println!("     {}", step.command.to_shell().dimmed());
        }
    }
}

fn print_steps(report: &ExecutionReport) {
    if report.steps.is_empty() {
        return;
    }
    println!();
    let total = report.plan.steps.len();
    for (i, outcome) in report.steps.iter().enumerate() {
        if outcome.success {
            println!("  {} [{}/{}] {}", "✓".green(), i + 1, total, outcome.name);
        } else {
            println!("  {} [{}/{}] {}", "✗".red(), i + 1, total, outcome.name);
            println!("      {}", outcome.failure_message().dimmed());
        }
    }

    if let Some(rollback) = &report.rollback {
        println!();
        println!("{}", "ロールバック:".yellow());
        for outcome in &rollback.attempted {
            let mark = if outcome.success {
                "✓".green()
            } else {
                "✗".red()
            };
            println!("  {} {}", mark, outcome.name);
        }
    }
}

fn print_failure(report: &ExecutionReport) {
    eprintln!();
    eprintln!("{}", "✗ 操作が失敗しました".red().bold());
    if let Some(failure) = &report.failure {
        eprintln!("  {}", failure);
        if let Failure::Prerequisite { .. } | Failure::Dependency { .. } = failure {
            eprintln!();
            eprintln!(
                "{}",
                "ヒント: 前提リソースを先に用意するか、--force で確認をスキップできます".yellow()
            );
        }
    }
    if let Some(script) = &report.rollback_script {
        eprintln!(
            "  ロールバックスクリプト: {}",
            script.display().to_string().cyan()
        );
    }
    eprintln!("  操作ID: {}", report.operation_id.cyan());
}
