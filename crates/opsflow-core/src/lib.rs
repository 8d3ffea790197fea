//! opsflow コア
//!
//! 操作定義のモデルとパース、`${VAR}` 変数の展開、型付きコマンドライン、
//! 定義ファイルのスキーマ検証、カタログ全体の依存関係検証を提供します。

pub mod catalog;
pub mod command;
pub mod definition;
pub mod error;
pub mod graph;
pub mod template;
pub mod validate;

pub use catalog::{Catalog, CatalogEntry, CatalogStats, MissingDependency};
pub use command::{CommandLine, shell_quote, split_command_line};
pub use definition::{
    CommandTemplate, Definition, DurationSpec, OperationMeta, Prerequisite, Requirement,
    ResolvedOperation, ResolvedPrerequisite, ResolvedStep, ResolvedTarget, Step, TargetSpec,
};
pub use error::{DefinitionError, Result};
pub use graph::find_cycles;
pub use template::{Variables, render_str};
pub use validate::{ValidationReport, validate_file, validate_str};
