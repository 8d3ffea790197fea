use crate::context::Context;
use chrono::Utc;
use colored::Colorize;

pub async fn handle(ctx: &Context, stale_after: Option<u64>) -> anyhow::Result<()> {
    let secs = stale_after.unwrap_or(ctx.config.reconcile.stale_after_secs);
    let stale_after = opsflow_state::span_from_secs(secs);

    println!(
        "{} {}秒以上終了していない操作",
        "整合性を確認中:".blue(),
        secs
    );
    let report = opsflow_engine::reconcile(&ctx.store, stale_after, Utc::now()).await?;

    if report.is_empty() {
        println!("{}", "✓ 放置された操作はありません".green());
        return Ok(());
    }

    for id in &report.reconciled {
        println!("  {} {}", "✗".red(), id.cyan());
    }
    println!();
    println!(
        "{} {}個の操作を failed に、{}個のロックを解放しました",
        "✓".green(),
        report.reconciled.len(),
        report.released_locks
    );
    Ok(())
}
