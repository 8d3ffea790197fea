use std::path::PathBuf;
use thiserror::Error;

/// 定義ファイルの読み込み・展開エラー
///
/// いずれも致命的で、操作は1ステップも実行されません。
#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("定義ファイルのYAMLパースエラー: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("定義ファイル読み込みエラー: {path}\n理由: {message}")]
    Io { path: PathBuf, message: String },

    #[error("必須フィールドがありません: {0}")]
    MissingField(String),

    #[error("無効な定義: {0}")]
    Invalid(String),

    #[error("未解決の変数: {}", .names.join(", "))]
    UnresolvedVariables { names: Vec<String> },

    #[error("不正なプレースホルダ: '{placeholder}' ({template})")]
    MalformedPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("コマンドのクォートが閉じていません: {0}")]
    UnterminatedQuote(String),

    #[error("コマンドが単独のバックスラッシュで終わっています: {0}")]
    TrailingBackslash(String),

    #[error("空のコマンド: ステップ '{0}'")]
    EmptyCommand(String),
}

pub type Result<T> = std::result::Result<T, DefinitionError>;
