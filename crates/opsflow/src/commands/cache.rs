use crate::context::Context;
use colored::Colorize;
use opsflow_engine::{ResourceCache, TtlPolicy};

fn cache(ctx: &Context) -> ResourceCache {
    ResourceCache::new(ctx.store.clone(), TtlPolicy::from_config(&ctx.config.cache))
}

pub async fn invalidate(ctx: &Context, type_pattern: &str, reason: &str) -> anyhow::Result<()> {
    let count = cache(ctx).invalidate(type_pattern, reason).await?;
    println!(
        "{} {} ({}個のリソース)",
        "✓ キャッシュを無効化しました:".green(),
        type_pattern.cyan(),
        count
    );
    Ok(())
}

pub async fn purge(ctx: &Context) -> anyhow::Result<()> {
    let count = cache(ctx).purge_expired().await?;
    if count == 0 {
        println!("{}", "消去対象のリソースはありません".dimmed());
    } else {
        println!("{} {}個", "✓ 削除済みリソースを消去しました:".green(), count);
    }
    Ok(())
}
