use colored::Colorize;
use opsflow_core::{Catalog, catalog::definition_files, validate_str};
use std::path::Path;

pub fn handle(path: &Path) -> anyhow::Result<()> {
    println!(
        "{} {}",
        "操作定義を検証中:".blue(),
        path.display().to_string().cyan()
    );

    if !path.exists() {
        eprintln!();
        eprintln!("{}", "✗ パスが見つかりません".red().bold());
        eprintln!("  {}", path.display());
        std::process::exit(1);
    }

    // スキーマ検証
    let mut checked = 0;
    let mut schema_errors = 0;
    for file in definition_files(path) {
        let content = match std::fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) => {
                schema_errors += 1;
                eprintln!("  {} {}: {}", "✗".red(), file.display(), e);
                continue;
            }
        };
        // 単一ファイル指定でなければ operation セクションの無いYAMLは対象外
        if path.is_dir() && !content.lines().any(|line| line.starts_with("operation:")) {
            continue;
        }

        checked += 1;
        let errors = validate_str(&content);
        if errors.is_empty() {
            println!("  {} {}", "✓".green(), file.display());
        } else {
            schema_errors += errors.len();
            println!("  {} {}", "✗".red(), file.display());
            for error in errors {
                println!("      {}", error);
            }
        }
    }

    // カタログ全体の依存関係
    let catalog = Catalog::load(path);
    let missing = catalog.missing_dependencies();
    let cycles = catalog.cycles();

    println!();
    if !catalog.duplicates.is_empty() {
        println!("{}", "重複した操作ID:".red());
        for (id, file) in &catalog.duplicates {
            println!("  • {} ({})", id.cyan(), file.display());
        }
    }
    if !missing.is_empty() {
        println!("{}", "存在しない依存操作:".red());
        for m in &missing {
            println!(
                "  • {} → {} ({})",
                m.operation_id.cyan(),
                m.missing_id.red(),
                m.path.display()
            );
        }
    }
    if !cycles.is_empty() {
        println!("{}", "循環依存:".red());
        for cycle in &cycles {
            println!("  • {}", cycle.join(" → "));
        }
    }

    let stats = catalog.stats();
    println!("サマリー:");
    println!("  検証したファイル: {}個", checked);
    println!("  操作: {}個", stats.total_operations);
    println!("  依存を持つ操作: {}個", stats.operations_with_deps);
    println!("  依存関係の総数: {}個", stats.total_dependencies);
    if let Some(op) = &stats.most_dependent_op {
        println!(
            "  最も依存の多い操作: {} ({}個)",
            op.cyan(),
            stats.max_dependencies
        );
    }

    let problems = schema_errors + catalog.duplicates.len() + missing.len() + cycles.len();
    if problems > 0 {
        eprintln!();
        eprintln!("{}", format!("✗ {}件の問題が見つかりました", problems).red().bold());
        std::process::exit(1);
    }

    println!();
    println!("{}", "✓ 操作定義は正常です！".green().bold());
    Ok(())
}
