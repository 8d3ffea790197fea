//! 定義ファイルのスキーマ検証
//!
//! パースの可否だけでなく、見つかった問題を全て列挙します。
//! `ops validate` から使われます。

use crate::command::split_command_line;
use crate::template::placeholders;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

pub const VALID_OPERATION_MODES: &[&str] = &[
    "create",
    "configure",
    "validate",
    "update",
    "delete",
    "read",
    "modify",
    "adopt",
    "assign",
    "verify",
    "add",
    "remove",
    "drain",
];

pub const VALID_CAPABILITIES: &[&str] = &[
    "networking",
    "storage",
    "identity",
    "compute",
    "avd",
    "management",
];

pub const VALID_DURATION_TYPES: &[&str] = &["FAST", "NORMAL", "WAIT", "LONG"];

/// 1ファイル分の検証結果
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub path: PathBuf,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// ファイルを検証
pub fn validate_file(path: &Path) -> ValidationReport {
    let errors = match std::fs::read_to_string(path) {
        Ok(content) => validate_str(&content),
        Err(e) => vec![format!("ファイルを読み込めません: {e}")],
    };
    ValidationReport {
        path: path.to_path_buf(),
        errors,
    }
}

/// YAML文字列を検証
pub fn validate_str(content: &str) -> Vec<String> {
    let document: Value = match serde_yaml::from_str(content) {
        Ok(Value::Null) => return vec!["空のYAMLファイルです".to_string()],
        Ok(value) => value,
        Err(e) => return vec![format!("YAMLパースエラー: {e}")],
    };

    let mut errors = Vec::new();
    let Some(root) = document.as_mapping() else {
        return vec!["トップレベルはマッピングである必要があります".to_string()];
    };

    match root.get("operation").and_then(Value::as_mapping) {
        Some(operation) => check_operation(operation, &mut errors),
        None => errors.push("必須フィールドがありません: operation".to_string()),
    }

    match root.get("steps") {
        Some(Value::Sequence(steps)) if !steps.is_empty() => {
            check_steps("steps", steps, &mut errors);
        }
        Some(Value::Sequence(_)) => errors.push("steps が空です".to_string()),
        Some(_) => errors.push("steps はリストである必要があります".to_string()),
        None => errors.push("必須フィールドがありません: steps".to_string()),
    }

    match root.get("rollback") {
        None | Some(Value::Null) => {}
        Some(Value::Sequence(steps)) => check_steps("rollback", steps, &mut errors),
        Some(_) => errors.push("rollback はリストである必要があります".to_string()),
    }

    match root.get("prerequisites") {
        None | Some(Value::Null) => {}
        Some(Value::Sequence(items)) => check_prerequisites(items, &mut errors),
        Some(_) => errors.push("prerequisites はリストである必要があります".to_string()),
    }

    errors
}

fn check_operation(operation: &Mapping, errors: &mut Vec<String>) {
    for field in ["id", "name", "type"] {
        match operation.get(field) {
            None => errors.push(format!("必須フィールドがありません: operation.{field}")),
            Some(Value::String(s)) if s.trim().is_empty() => {
                errors.push(format!("必須フィールドが空です: operation.{field}"));
            }
            Some(Value::String(_)) => {}
            Some(_) => errors.push(format!("operation.{field} は文字列である必要があります")),
        }
    }

    check_enum(operation, "operation_mode", VALID_OPERATION_MODES, errors);
    check_enum(operation, "capability", VALID_CAPABILITIES, errors);

    if let Some(duration) = operation.get("duration") {
        match duration.as_mapping() {
            Some(duration) => check_duration(duration, errors),
            None => errors.push("operation.duration はマッピングである必要があります".to_string()),
        }
    }

    if let Some(target) = operation.get("target") {
        match target.as_mapping() {
            Some(target) if target.get("name").and_then(Value::as_str).is_some() => {
                check_template_field("operation.target.name", target.get("name"), errors);
                check_template_field(
                    "operation.target.resource_group",
                    target.get("resource_group"),
                    errors,
                );
            }
            _ => errors.push("operation.target には name が必要です".to_string()),
        }
    }

    if let Some(requires) = operation.get("requires") {
        match requires {
            Value::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    let ok = item.as_str().is_some()
                        || item
                            .as_mapping()
                            .and_then(|m| m.get("operation"))
                            .and_then(Value::as_str)
                            .is_some();
                    if !ok {
                        errors.push(format!(
                            "operation.requires[{i}] は操作IDまたは {{operation: id}} である必要があります"
                        ));
                    }
                }
            }
            _ => errors.push("operation.requires はリストである必要があります".to_string()),
        }
    }
}

fn check_enum(operation: &Mapping, field: &str, valid: &[&str], errors: &mut Vec<String>) {
    if let Some(value) = operation.get(field) {
        match value.as_str() {
            Some(s) if valid.contains(&s) => {}
            _ => errors.push(format!(
                "不正な {field}: '{}' (有効な値: {})",
                display_value(value),
                valid.join(", ")
            )),
        }
    }
}

fn check_duration(duration: &Mapping, errors: &mut Vec<String>) {
    if let Some(kind) = duration.get("type") {
        match kind.as_str() {
            Some(s) if VALID_DURATION_TYPES.contains(&s) => {}
            _ => errors.push(format!(
                "不正な duration.type: '{}' (有効な値: {})",
                display_value(kind),
                VALID_DURATION_TYPES.join(", ")
            )),
        }
    }

    let mut positive = |field: &str| -> Option<u64> {
        let value = duration.get(field)?;
        match value.as_i64() {
            Some(n) if n > 0 => Some(n as u64),
            Some(n) => {
                errors.push(format!("duration.{field} は正の整数である必要があります: {n}"));
                None
            }
            None => {
                errors.push(format!(
                    "duration.{field} は整数である必要があります: {}",
                    display_value(value)
                ));
                None
            }
        }
    };

    let expected = positive("expected");
    let timeout = positive("timeout");
    if let (Some(expected), Some(timeout)) = (expected, timeout)
        && timeout < expected
    {
        errors.push(format!(
            "duration.timeout ({timeout}) は duration.expected ({expected}) 以上である必要があります"
        ));
    }
}

fn check_steps(section: &str, steps: &[Value], errors: &mut Vec<String>) {
    for (i, step) in steps.iter().enumerate() {
        let Some(step) = step.as_mapping() else {
            errors.push(format!("{section}[{i}] はマッピングである必要があります"));
            continue;
        };

        match step.get("name").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => {}
            _ => errors.push(format!("{section}[{i}] に name がありません")),
        }

        match step.get("command") {
            None => errors.push(format!("{section}[{i}] に command がありません")),
            Some(Value::String(line)) => match split_command_line(line) {
                Ok(args) if args.is_empty() => {
                    errors.push(format!("{section}[{i}].command が空です"));
                }
                Ok(args) => {
                    for arg in args {
                        if let Err(e) = placeholders(&arg) {
                            errors.push(format!("{section}[{i}].command: {e}"));
                        }
                    }
                }
                Err(e) => errors.push(format!("{section}[{i}].command: {e}")),
            },
            Some(Value::Sequence(args)) => {
                if args.is_empty() {
                    errors.push(format!("{section}[{i}].command が空です"));
                }
                for (j, arg) in args.iter().enumerate() {
                    match arg.as_str() {
                        Some(arg) => {
                            if let Err(e) = placeholders(arg) {
                                errors.push(format!("{section}[{i}].command[{j}]: {e}"));
                            }
                        }
                        None => errors.push(format!(
                            "{section}[{i}].command[{j}] は文字列である必要があります: {}",
                            display_value(arg)
                        )),
                    }
                }
            }
            Some(other) => errors.push(format!(
                "{section}[{i}].command は文字列またはリストである必要があります: {}",
                display_value(other)
            )),
        }

        if let Some(flag) = step.get("continue_on_error")
            && !flag.is_bool()
        {
            errors.push(format!(
                "{section}[{i}].continue_on_error は真偽値である必要があります"
            ));
        }
    }
}

fn check_prerequisites(items: &[Value], errors: &mut Vec<String>) {
    for (i, item) in items.iter().enumerate() {
        let Some(item) = item.as_mapping() else {
            errors.push(format!("prerequisites[{i}] はマッピングである必要があります"));
            continue;
        };

        if item.get("resource_type").and_then(Value::as_str).is_none() {
            errors.push(format!("prerequisites[{i}] に resource_type がありません"));
        }

        let has_name = item.get("name").is_some();
        let has_config = item.get("name_from_config").is_some();
        if has_name == has_config {
            errors.push(format!(
                "prerequisites[{i}] には name か name_from_config のどちらか一方が必要です"
            ));
        }
        check_template_field(&format!("prerequisites[{i}].name"), item.get("name"), errors);
        check_template_field(
            &format!("prerequisites[{i}].resource_group"),
            item.get("resource_group"),
            errors,
        );

        if let Some(kind) = item.get("dependency_type")
            && !matches!(kind.as_str(), Some("required" | "optional"))
        {
            errors.push(format!(
                "prerequisites[{i}].dependency_type は required か optional です: '{}'",
                display_value(kind)
            ));
        }
    }
}

fn check_template_field(field: &str, value: Option<&Value>, errors: &mut Vec<String>) {
    if let Some(text) = value.and_then(Value::as_str)
        && let Err(e) = placeholders(text)
    {
        errors.push(format!("{field}: {e}"));
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "?".to_string()),
    }
}
