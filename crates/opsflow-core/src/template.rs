//! 変数展開
//!
//! `${VAR}` 形式のプレースホルダを変数マップから展開します。
//! `$${` はリテラルの `${` になります。
//!
//! 展開は1パスで行い、展開後の値を再スキャンしません。

use crate::error::{DefinitionError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

/// 変数コンテキスト
pub type Variables = BTreeMap<String, String>;

/// `$${` / `${...}` / 閉じていない `${` のいずれかにマッチ
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\$\{|\$\{([^}]*)\}|\$\{").expect("valid placeholder regex"));

static VARIABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid name regex"));

/// テンプレート中の変数名を列挙（出現順・重複あり）
pub fn placeholders(template: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        if whole == "$${" {
            continue;
        }
        names.push(placeholder_name(template, whole, caps.get(1).map(|m| m.as_str()))?);
    }
    Ok(names)
}

/// テンプレートを展開する
///
/// 見つからない変数名は `missing` に追加され、その箇所は空のまま返ります。
/// 呼び出し側は `missing` が空でない限り結果を使ってはいけません。
pub fn render_collecting(
    template: &str,
    variables: &Variables,
    missing: &mut BTreeSet<String>,
) -> Result<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        rendered.push_str(&template[last..whole.start()]);
        last = whole.end();

        if whole.as_str() == "$${" {
            rendered.push_str("${");
            continue;
        }

        let name = placeholder_name(template, whole.as_str(), caps.get(1).map(|m| m.as_str()))?;
        match variables.get(&name) {
            Some(value) => rendered.push_str(value),
            None => {
                missing.insert(name);
            }
        }
    }

    rendered.push_str(&template[last..]);
    Ok(rendered)
}

/// テンプレートを展開する（未解決変数があればエラー）
pub fn render_str(template: &str, variables: &Variables) -> Result<String> {
    let mut missing = BTreeSet::new();
    let rendered = render_collecting(template, variables, &mut missing)?;
    if !missing.is_empty() {
        return Err(DefinitionError::UnresolvedVariables {
            names: missing.into_iter().collect(),
        });
    }
    Ok(rendered)
}

fn placeholder_name(template: &str, whole: &str, inner: Option<&str>) -> Result<String> {
    match inner {
        Some(name) if VARIABLE_NAME.is_match(name.trim()) => Ok(name.trim().to_string()),
        _ => Err(DefinitionError::MalformedPlaceholder {
            template: template.to_string(),
            placeholder: whole.to_string(),
        }),
    }
}
