use crate::context::Context;
use colored::Colorize;
use opsflow_state::{LogLevel, OperationStatus};

pub async fn handle(ctx: &Context, operation_id: &str) -> anyhow::Result<()> {
    let Some(op) = ctx.store.get_operation(operation_id).await? else {
        anyhow::bail!("操作 '{}' が見つかりません", operation_id);
    };

    let status = match op.status {
        OperationStatus::Completed => op.status.to_string().green(),
        OperationStatus::Failed => op.status.to_string().red(),
        _ => op.status.to_string().yellow(),
    };

    println!("{} {}", "操作:".bold(), op.id.cyan());
    println!("  定義:     {} ({})", op.definition_id, op.name);
    println!("  状態:     {}", status);
    println!("  モード:   {}", op.mode);
    if let Some(target) = &op.target_resource {
        println!("  対象:     {}", target);
    }
    println!(
        "  進捗:     {}/{} {}",
        op.current_step,
        op.total_steps,
        op.current_step_label.as_deref().unwrap_or("")
    );
    println!("  作成:     {}", op.created_at.to_rfc3339());
    if let Some(started) = op.started_at {
        println!("  開始:     {}", started.to_rfc3339());
    }
    if let Some(finished) = op.finished_at {
        println!("  終了:     {}", finished.to_rfc3339());
    }
    if let Some(error) = &op.error {
        println!("  エラー:   {}", error.red());
    }

    let logs = ctx.store.operation_logs(&op.id).await?;
    if !logs.is_empty() {
        println!();
        println!("{}", "ログ:".bold());
        for entry in logs {
            let level = match entry.level {
                LogLevel::Info => "INFO ".normal(),
                LogLevel::Warn => "WARN ".yellow(),
                LogLevel::Error => "ERROR".red(),
            };
            println!(
                "  {} {} {}",
                entry.logged_at.format("%H:%M:%S").to_string().dimmed(),
                level,
                entry.message
            );
        }
    }

    Ok(())
}
