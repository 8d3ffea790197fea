mod commands;
mod context;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ops")]
#[command(about = "宣言的なクラウド運用。前提を確かめ、状態を記録し、失敗は巻き戻す。", long_about = None)]
struct Cli {
    /// 設定ファイルのパス
    #[arg(long, global = true, env = opsflow_config::CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 操作定義を実行
    Execute {
        /// 操作定義ファイル (YAML)
        definition: PathBuf,
        /// コマンドを実行せず、展開済みの計画だけを表示
        #[arg(long, conflicts_with = "force")]
        dry_run: bool,
        /// 前提条件のチェックをスキップ
        #[arg(long)]
        force: bool,
        /// 変数の上書き (KEY=VALUE、複数指定可)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
    /// リソースグループを探索し、依存グラフを出力
    Discover {
        /// リソースグループ名
        resource_group: String,
        /// サブスクリプション（省略時は設定ファイルの値）
        #[arg(long)]
        subscription: Option<String>,
        /// 出力ディレクトリ
        #[arg(short, long, default_value = "discovery")]
        output: PathBuf,
        /// クラウドに問い合わせず、記録済みの状態だけを使う
        #[arg(long)]
        offline: bool,
    },
    /// リソースキャッシュを無効化
    #[command(name = "invalidate-cache")]
    InvalidateCache {
        /// リソースタイプのパターン (例: "compute/*")
        type_pattern: String,
        /// 無効化の理由（監査ログに記録）
        reason: String,
    },
    /// 操作定義のスキーマと依存関係を検証
    Validate {
        /// 定義ファイルまたはディレクトリ
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// 状態の集計を表示
    Status,
    /// 操作の詳細とログを表示
    Show {
        /// 操作ID
        operation_id: String,
    },
    /// 終了状態にならなかった操作を失敗として閉じる
    Reconcile {
        /// この秒数より古い pending/running の操作が対象（省略時は設定値）
        #[arg(
            long,
            value_parser = clap::value_parser!(u64).range(..=opsflow_config::MAX_DURATION_SECS)
        )]
        stale_after: Option<u64>,
    },
    /// 期限切れの削除済みリソースを消去
    Purge,
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログはstderrへ（stdoutはコマンドの出力に使う）
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    // Versionとvalidateは設定ファイル不要
    match &cli.command {
        Commands::Version => {
            println!("opsflow {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Validate { path } => {
            return commands::validate::handle(path);
        }
        _ => {}
    }

    let (config, config_path) = opsflow_config::load(cli.config.as_deref())?;
    let ctx = context::Context::open(config, config_path).await?;

    match cli.command {
        Commands::Execute {
            definition,
            dry_run,
            force,
            vars,
        } => {
            commands::execute::handle(ctx, &definition, dry_run, force, &vars).await?;
        }
        Commands::Discover {
            resource_group,
            subscription,
            output,
            offline,
        } => {
            commands::discover::handle(&ctx, resource_group, subscription, &output, offline)
                .await?;
        }
        Commands::InvalidateCache {
            type_pattern,
            reason,
        } => {
            commands::cache::invalidate(&ctx, &type_pattern, &reason).await?;
        }
        Commands::Status => {
            commands::status::handle(&ctx).await?;
        }
        Commands::Show { operation_id } => {
            commands::show::handle(&ctx, &operation_id).await?;
        }
        Commands::Reconcile { stale_after } => {
            commands::reconcile::handle(&ctx, stale_after).await?;
        }
        Commands::Purge => {
            commands::cache::purge(&ctx).await?;
        }
        Commands::Validate { .. } | Commands::Version => {
            unreachable!("handled before config loading");
        }
    }

    Ok(())
}
