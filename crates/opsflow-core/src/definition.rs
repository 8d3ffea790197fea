//! 操作定義 (operation definition)
//!
//! 1ファイル = 1操作の宣言的な定義です。実行のたびにパースされ、永続化はされません。

use crate::command::{CommandLine, split_command_line};
use crate::error::{DefinitionError, Result};
use crate::template::{Variables, render_collecting};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// 操作定義
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub operation: OperationMeta,

    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,

    pub steps: Vec<Step>,

    #[serde(default)]
    pub rollback: Vec<Step>,
}

/// `operation:` セクション
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMeta {
    pub id: String,
    pub name: String,

    /// 対象リソースタイプ (例: "network/virtual-network")
    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default)]
    pub capability: Option<String>,

    /// create / delete / update など
    #[serde(default)]
    pub operation_mode: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// 最終状態を取得する対象リソース
    #[serde(default)]
    pub target: Option<TargetSpec>,

    /// カタログ上で先に実行されているべき操作
    #[serde(default)]
    pub requires: Vec<Requirement>,

    #[serde(default)]
    pub duration: Option<DurationSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    #[serde(default)]
    pub resource_group: Option<String>,
}

/// 依存操作の参照（文字列または `{operation: id}`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Requirement {
    Id(String),
    Operation { operation: String },
}

impl Requirement {
    pub fn operation_id(&self) -> &str {
        match self {
            Requirement::Id(id) => id,
            Requirement::Operation { operation } => operation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationSpec {
    #[serde(default)]
    pub expected: Option<u64>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// 前提リソース
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prerequisite {
    pub resource_type: String,

    /// リテラル名（`${VAR}` 可）
    #[serde(default)]
    pub name: Option<String>,

    /// 名前を取り出す変数名
    #[serde(default)]
    pub name_from_config: Option<String>,

    #[serde(default)]
    pub resource_group: Option<String>,

    /// "required" (デフォルト) または "optional"
    #[serde(default)]
    pub dependency_type: Option<String>,
}

/// 実行ステップ（ロールバックステップも同じ形）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub command: CommandTemplate,
    #[serde(default)]
    pub continue_on_error: bool,
}

/// コマンドテンプレート: 引数リストまたはコマンド文字列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandTemplate {
    Args(Vec<String>),
    Line(String),
}

impl CommandTemplate {
    /// 変数展開前の引数テンプレート
    pub fn arg_templates(&self) -> Result<Vec<String>> {
        match self {
            CommandTemplate::Args(args) => Ok(args.clone()),
            CommandTemplate::Line(line) => split_command_line(line),
        }
    }
}

/// 変数解決済みの操作
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedOperation {
    pub id: String,
    pub name: String,
    pub resource_type: String,
    pub capability: Option<String>,
    pub action: Option<String>,
    pub target: Option<ResolvedTarget>,
    pub prerequisites: Vec<ResolvedPrerequisite>,
    pub steps: Vec<ResolvedStep>,
    pub rollback: Vec<ResolvedStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTarget {
    pub name: String,
    pub resource_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPrerequisite {
    pub resource_type: String,
    pub name: String,
    pub resource_group: Option<String>,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedStep {
    pub name: String,
    pub command: CommandLine,
    pub continue_on_error: bool,
}

impl ResolvedOperation {
    /// 作成系の操作かどうか（管理対象フラグの付与に使う）
    pub fn creates_resource(&self) -> bool {
        matches!(self.action.as_deref(), Some("create" | "adopt"))
    }

    /// 削除系の操作かどうか
    pub fn removes_resource(&self) -> bool {
        matches!(self.action.as_deref(), Some("delete" | "remove"))
    }
}

impl Definition {
    /// YAML文字列からパース
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let definition: Definition = serde_yaml::from_str(content)?;
        definition.check_structure()?;
        Ok(definition)
    }

    /// ファイルから読み込み
    #[tracing::instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DefinitionError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let definition = Self::from_yaml_str(&content)?;
        tracing::debug!(
            operation_id = %definition.operation.id,
            steps = definition.steps.len(),
            rollback_steps = definition.rollback.len(),
            "Loaded operation definition"
        );
        Ok(definition)
    }

    /// 構造上の必須条件を検査
    fn check_structure(&self) -> Result<()> {
        let meta = &self.operation;
        for (field, value) in [
            ("operation.id", &meta.id),
            ("operation.name", &meta.name),
            ("operation.type", &meta.resource_type),
        ] {
            if value.trim().is_empty() {
                return Err(DefinitionError::MissingField(field.to_string()));
            }
        }

        if self.steps.is_empty() {
            return Err(DefinitionError::MissingField("steps".to_string()));
        }

        for (i, prerequisite) in self.prerequisites.iter().enumerate() {
            if prerequisite.resource_type.trim().is_empty() {
                return Err(DefinitionError::MissingField(format!(
                    "prerequisites[{i}].resource_type"
                )));
            }
            match (&prerequisite.name, &prerequisite.name_from_config) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(DefinitionError::Invalid(format!(
                        "prerequisites[{i}] には name か name_from_config のどちらか一方を指定してください"
                    )));
                }
            }
            if let Some(kind) = &prerequisite.dependency_type
                && kind != "required"
                && kind != "optional"
            {
                return Err(DefinitionError::Invalid(format!(
                    "prerequisites[{i}].dependency_type は required か optional です: '{kind}'"
                )));
            }
        }

        for step in self.steps.iter().chain(self.rollback.iter()) {
            if step.name.trim().is_empty() {
                return Err(DefinitionError::MissingField("step name".to_string()));
            }
        }

        Ok(())
    }

    /// 変数を解決して実行可能な形にする
    ///
    /// 未解決の変数が1つでもあれば、全ての未解決名をまとめてエラーにします。
    /// 部分的に展開された結果は返しません。
    pub fn resolve(&self, variables: &Variables) -> Result<ResolvedOperation> {
        let mut missing = BTreeSet::new();
        let meta = &self.operation;

        let target = match &meta.target {
            Some(target) => Some(ResolvedTarget {
                name: render_collecting(&target.name, variables, &mut missing)?,
                resource_group: render_optional(&target.resource_group, variables, &mut missing)?,
            }),
            None => None,
        };

        let mut prerequisites = Vec::with_capacity(self.prerequisites.len());
        for prerequisite in &self.prerequisites {
            let name = match (&prerequisite.name, &prerequisite.name_from_config) {
                (Some(literal), _) => render_collecting(literal, variables, &mut missing)?,
                (None, Some(key)) => match variables.get(key) {
                    Some(value) => value.clone(),
                    None => {
                        missing.insert(key.clone());
                        String::new()
                    }
                },
                (None, None) => {
                    return Err(DefinitionError::Invalid(format!(
                        "prerequisite '{}' has no name",
                        prerequisite.resource_type
                    )));
                }
            };
            prerequisites.push(ResolvedPrerequisite {
                resource_type: prerequisite.resource_type.clone(),
                name,
                resource_group: render_optional(
                    &prerequisite.resource_group,
                    variables,
                    &mut missing,
                )?,
                required: prerequisite.dependency_type.as_deref() != Some("optional"),
            });
        }

        let steps = resolve_steps(&self.steps, variables, &mut missing)?;
        let rollback = resolve_steps(&self.rollback, variables, &mut missing)?;

        if !missing.is_empty() {
            return Err(DefinitionError::UnresolvedVariables {
                names: missing.into_iter().collect(),
            });
        }

        Ok(ResolvedOperation {
            id: meta.id.clone(),
            name: meta.name.clone(),
            resource_type: meta.resource_type.clone(),
            capability: meta.capability.clone(),
            action: meta.operation_mode.clone(),
            target,
            prerequisites,
            steps,
            rollback,
        })
    }
}

fn render_optional(
    template: &Option<String>,
    variables: &Variables,
    missing: &mut BTreeSet<String>,
) -> Result<Option<String>> {
    template
        .as_deref()
        .map(|t| render_collecting(t, variables, missing))
        .transpose()
}

fn resolve_steps(
    steps: &[Step],
    variables: &Variables,
    missing: &mut BTreeSet<String>,
) -> Result<Vec<ResolvedStep>> {
    let mut resolved = Vec::with_capacity(steps.len());
    for step in steps {
        let mut argv = Vec::new();
        for arg in step.command.arg_templates()? {
            argv.push(render_collecting(&arg, variables, missing)?);
        }
        // 未解決の変数があると argv が空になり得るので、その場合は後段のエラーに任せる
        let command = match CommandLine::new(argv) {
            Some(command) => command,
            None if !missing.is_empty() => continue,
            None => return Err(DefinitionError::EmptyCommand(step.name.clone())),
        };
        resolved.push(ResolvedStep {
            name: step.name.clone(),
            command,
            continue_on_error: step.continue_on_error,
        });
    }
    Ok(resolved)
}
