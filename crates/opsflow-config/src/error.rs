use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: opsflow.local.yaml, .opsflow.local.yaml, opsflow.yaml, .opsflow.yaml\n\
        - ./.opsflow/ ディレクトリ\n\
        - ~/.config/opsflow/opsflow.yaml\n\
        または OPSFLOW_CONFIG_PATH 環境変数で直接指定できます"
    )]
    ConfigFileNotFound,

    #[error("設定ファイルのパースに失敗しました: {path}\n理由: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{field} が大きすぎます: {value} (上限: {max}秒)")]
    OutOfRange { field: String, value: u64, max: u64 },

    #[error("不正な変数指定: '{0}' (KEY=VALUE 形式で指定してください)")]
    InvalidVariable(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
