use crate::context::Context;
use chrono::Utc;
use colored::Colorize;
use opsflow_state::OperationStatus;

const RECENT_FAILURES: u32 = 5;

pub async fn handle(ctx: &Context) -> anyhow::Result<()> {
    ctx.print_config_source();
    let store = &ctx.store;

    let summary = store.operation_summary().await?;
    println!();
    println!("{}", "操作".bold());
    println!("  pending:   {}", summary.pending);
    println!("  running:   {}", summary.running);
    println!("  completed: {}", summary.completed.to_string().green());
    println!("  failed:    {}", summary.failed.to_string().red());
    println!("  dry run:   {}", summary.dry_runs.to_string().dimmed());

    let cache = store.cache_stats(Utc::now()).await?;
    println!();
    println!("{}", "キャッシュ".bold());
    println!("  fresh:   {}", cache.fresh);
    println!("  stale:   {}", cache.stale);
    println!("  deleted: {}", cache.deleted);

    let counts = store.resource_counts_by_type().await?;
    println!();
    println!("{}", "リソース".bold());
    if counts.is_empty() {
        println!("  {}", "(記録なし)".dimmed());
    }
    for (resource_type, count) in counts {
        println!("  {} {}", resource_type.cyan(), count);
    }

    let running = store
        .list_operations(Some(OperationStatus::Running), 20)
        .await?;
    if !running.is_empty() {
        println!();
        println!("{}", "実行中の操作".bold());
        for op in running {
            println!(
                "  {} [{}/{}] {}",
                op.id.cyan(),
                op.current_step,
                op.total_steps,
                op.current_step_label.as_deref().unwrap_or("-")
            );
        }
    }

    let failed = store.failed_operations(RECENT_FAILURES).await?;
    if !failed.is_empty() {
        println!();
        println!("{}", "最近の失敗".bold());
        for op in failed {
            println!(
                "  {} {}",
                op.id.red(),
                op.error.as_deref().unwrap_or("").dimmed()
            );
        }
    }

    Ok(())
}
