pub mod error;
pub mod model;

pub use error::*;
pub use model::*;

use std::path::{Path, PathBuf};

/// 設定ファイルの候補（優先順）
const CANDIDATES: [&str; 4] = [
    "opsflow.local.yaml",
    ".opsflow.local.yaml",
    "opsflow.yaml",
    ".opsflow.yaml",
];

/// 設定ファイルパスの環境変数
pub const CONFIG_PATH_ENV: &str = "OPSFLOW_CONFIG_PATH";

/// プロジェクトの opsflow.yaml を探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 OPSFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: opsflow.local.yaml, .opsflow.local.yaml, opsflow.yaml, .opsflow.yaml
/// 3. ./.opsflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/opsflow/opsflow.yaml (グローバル設定)
pub fn find_config_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "OPSFLOW_CONFIG_PATH is set but file does not exist");
    }

    let current_dir = std::env::current_dir()?;
    if let Some(path) = find_config_file_in(&current_dir) {
        return Ok(path);
    }

    // 4. グローバル設定ファイル
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("opsflow").join("opsflow.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// 指定ディレクトリと その .opsflow/ サブディレクトリから設定ファイルを探す
pub fn find_config_file_in(dir: &Path) -> Option<PathBuf> {
    for filename in &CANDIDATES {
        let path = dir.join(filename);
        if path.exists() {
            return Some(path);
        }
    }

    let ops_dir = dir.join(".opsflow");
    if ops_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = ops_dir.join(filename);
            if path.exists() {
                return Some(path);
            }
        }
    }

    None
}

/// 設定ファイルを読み込む
///
/// 相対パスは設定ファイルのあるディレクトリ基準で解決されます。
/// `.opsflow/` 内に置かれている場合はプロジェクトルート（その親）が基準です。
#[tracing::instrument]
pub fn load_config(path: &Path) -> Result<OpsConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut config: OpsConfig = if content.trim().is_empty() {
        OpsConfig::default()
    } else {
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };

    let mut base = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    if base.file_name().is_some_and(|name| name == ".opsflow") {
        base.pop();
    }
    config.resolve_paths(&base);
    config.validate()?;

    tracing::info!(
        config = %path.display(),
        variable_count = config.variables.len(),
        "Loaded configuration"
    );
    Ok(config)
}

/// 設定を発見して読み込む
///
/// 明示パスが指定されていればそれを使い、なければ `find_config_file` で探します。
/// どこにも無い場合はデフォルト設定（カレントディレクトリ基準）を返します。
/// 環境変数 `OPS_*` は常に重ねられます。
pub fn load(explicit: Option<&Path>) -> Result<(OpsConfig, Option<PathBuf>)> {
    let found = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => match find_config_file() {
            Ok(path) => Some(path),
            Err(ConfigError::ConfigFileNotFound) => None,
            Err(e) => return Err(e),
        },
    };

    let mut config = match &found {
        Some(path) => load_config(path)?,
        None => {
            tracing::debug!("No configuration file found, using defaults");
            let mut config = OpsConfig::default();
            config.resolve_paths(&std::env::current_dir()?);
            config
        }
    };
    config.merge_env_variables(std::env::vars());

    Ok((config, found))
}
