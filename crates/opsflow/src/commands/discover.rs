use crate::context::Context;
use colored::Colorize;
use opsflow_engine::Discovery;
use opsflow_state::ResourceScope;
use std::path::Path;

pub async fn handle(
    ctx: &Context,
    resource_group: String,
    subscription: Option<String>,
    output: &Path,
    offline: bool,
) -> anyhow::Result<()> {
    let scope = ResourceScope::new(
        subscription.or_else(|| ctx.config.subscription.clone()),
        Some(resource_group),
    );
    println!("{} {}", "リソースを探索中:".blue(), scope.to_string().cyan());

    let engine = ctx.engine();
    if !offline && !engine.probe().can_list() {
        println!(
            "{}",
            "effector.list が未設定のため、記録済みの状態から出力します".yellow()
        );
    }

    let discovery = Discovery {
        cache: engine.cache(),
        resolver: engine.resolver(),
        effector: engine.effector(),
        probe: engine.probe(),
    };
    let report = discovery.run(&scope, output, offline).await?;

    println!();
    if report.live {
        println!("  更新したリソース: {}個", report.refreshed);
        println!("  推定した依存関係: {}個", report.inferred_edges);
    }
    println!("  リソース: {}個", report.graph.nodes.len());
    for (resource_type, count) in report.graph.counts_by_type() {
        println!("    - {} ({})", resource_type.cyan(), count);
    }
    println!("  依存関係: {}個", report.graph.edges.len());

    let cycles = report.graph.cycles();
    if !cycles.is_empty() {
        println!(
            "  {} {}個",
            "⚠ 循環依存:".yellow(),
            cycles.len()
        );
    }

    println!();
    println!("{}", "✓ 出力しました".green().bold());
    for file in &report.files {
        println!("  • {}", file.display().to_string().cyan());
    }
    Ok(())
}
