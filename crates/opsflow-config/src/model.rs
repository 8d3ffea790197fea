//! 設定ファイルのモデル
//!
//! `opsflow.yaml` の構造を表します。全てのセクションは省略可能で、
//! 省略時はデフォルト値が使われます。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 環境変数から変数を取り込む際のプレフィックス
pub const ENV_VARIABLE_PREFIX: &str = "OPS_";

const DEFAULT_DATABASE: &str = ".opsflow/state.db";
const DEFAULT_ROLLBACK_DIR: &str = ".opsflow/rollback";
const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_LEASE_SECS: u64 = 3600;
const DEFAULT_STALE_AFTER_SECS: u64 = 6 * 3600;

/// 秒数で指定する設定値の上限（100年）
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 3600;

/// opsflow 全体の設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    /// 全スコープに適用されるサブスクリプション
    pub subscription: Option<String>,

    /// `${VAR}` 展開に使う変数
    pub variables: BTreeMap<String, String>,

    pub state: StateConfig,
    pub cache: CacheConfig,
    pub effector: EffectorConfig,
    pub locks: LockConfig,
    pub reconcile: ReconcileConfig,
}

/// 状態ストアとロールバックスクリプトの保存先
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub database: PathBuf,
    pub rollback_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            rollback_dir: PathBuf::from(DEFAULT_ROLLBACK_DIR),
        }
    }
}

/// キャッシュTTL設定
///
/// `ttl` のキーはリソースタイプそのもの、または `compute/*` のようなglobパターン。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub ttl: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL_SECS,
            ttl: BTreeMap::new(),
        }
    }
}

/// 外部コマンド (az など) の呼び出し設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectorConfig {
    /// 単一リソースのライブ確認コマンド
    pub probe: Option<Vec<String>>,

    /// リソースグループ内のリソース一覧コマンド（discover 用）
    pub list: Option<Vec<String>>,

    /// 1コマンドあたりのタイムアウト（秒）
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub lease_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_secs: DEFAULT_LEASE_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub stale_after_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }
}

impl OpsConfig {
    /// 相対パスを設定ファイルのディレクトリ基準に解決
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.state.database.is_relative() {
            self.state.database = base.join(&self.state.database);
        }
        if self.state.rollback_dir.is_relative() {
            self.state.rollback_dir = base.join(&self.state.rollback_dir);
        }
    }

    /// 秒数指定の値が上限内かを確認
    pub fn validate(&self) -> crate::Result<()> {
        let mut checks = vec![
            ("cache.default_ttl_secs".to_string(), self.cache.default_ttl_secs),
            ("locks.lease_secs".to_string(), self.locks.lease_secs),
            ("reconcile.stale_after_secs".to_string(), self.reconcile.stale_after_secs),
        ];
        if let Some(timeout) = self.effector.timeout_secs {
            checks.push(("effector.timeout_secs".to_string(), timeout));
        }
        checks.extend(
            self.cache
                .ttl
                .iter()
                .map(|(key, secs)| (format!("cache.ttl.\"{key}\""), *secs)),
        );

        match checks.into_iter().find(|(_, value)| *value > MAX_DURATION_SECS) {
            Some((field, value)) => Err(crate::ConfigError::OutOfRange {
                field,
                value,
                max: MAX_DURATION_SECS,
            }),
            None => Ok(()),
        }
    }

    /// 環境変数 `OPS_*` を変数に重ねる（プレフィックスは除去）
    ///
    /// 設定ファイルの値より優先されます。
    pub fn merge_env_variables(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(ENV_VARIABLE_PREFIX)
                && !name.is_empty()
            {
                tracing::debug!(key = %name, "Adding variable from environment");
                self.variables.insert(name.to_string(), value);
            }
        }
    }

    /// `KEY=VALUE` 形式の上書き指定を適用（最優先）
    pub fn merge_overrides(&mut self, overrides: &[String]) -> crate::Result<()> {
        for item in overrides {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| crate::ConfigError::InvalidVariable(item.clone()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(crate::ConfigError::InvalidVariable(item.clone()));
            }
            self.variables.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }
}
