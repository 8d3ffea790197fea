use colored::Colorize;
use opsflow_config::OpsConfig;
use opsflow_engine::{Engine, EngineSettings, LiveProbe, ProcessEffector, TtlPolicy};
use opsflow_state::StateStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// コマンド共通の実行環境（設定 + 状態ストア）
pub struct Context {
    pub config: OpsConfig,
    pub config_path: Option<PathBuf>,
    pub store: StateStore,
}

impl Context {
    pub async fn open(config: OpsConfig, config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let store = StateStore::open(&config.state.database).await?;
        tracing::debug!(database = %config.state.database.display(), "Opened state store");
        Ok(Self {
            config,
            config_path,
            store,
        })
    }

    /// 設定からエンジンを組み立てる
    pub fn engine(&self) -> Engine {
        let mut effector = ProcessEffector::new();
        if let Some(secs) = self.config.effector.timeout_secs {
            effector = effector.with_timeout(Duration::from_secs(secs));
        }

        Engine::new(
            self.store.clone(),
            Arc::new(effector),
            self.probe(),
            TtlPolicy::from_config(&self.config.cache),
            EngineSettings::from(&self.config),
        )
    }

    pub fn probe(&self) -> LiveProbe {
        LiveProbe::new(
            self.config.effector.probe.clone(),
            self.config.effector.list.clone(),
            self.config.variables.clone(),
        )
    }

    /// 読み込んだ設定ファイルを表示
    pub fn print_config_source(&self) {
        match &self.config_path {
            Some(path) => println!("📄 設定ファイル: {}", path.display().to_string().cyan()),
            None => println!("📄 設定ファイル: {}", "(なし、デフォルト設定)".dimmed()),
        }
    }
}
