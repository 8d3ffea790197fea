//! 外部コマンドの型付き表現
//!
//! コマンドは常に引数リスト (argv) として扱い、シェルを経由しません。
//! 文字列で書かれたコマンドは先に引数へ分割し、その後で引数ごとに
//! 変数展開します。展開値が引数を増やしたりシェル解釈されることはありません。

use crate::error::{DefinitionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 展開済みのコマンドライン
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawCommandLine")]
pub struct CommandLine {
    argv: Vec<String>,
}

#[derive(Deserialize)]
struct RawCommandLine {
    argv: Vec<String>,
}

impl TryFrom<RawCommandLine> for CommandLine {
    type Error = String;

    fn try_from(raw: RawCommandLine) -> std::result::Result<Self, Self::Error> {
        CommandLine::new(raw.argv).ok_or_else(|| "コマンドが空です".to_string())
    }
}

impl CommandLine {
    /// argv からコマンドラインを作成（空は不可）
    pub fn new(argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() || argv[0].is_empty() {
            None
        } else {
            Some(Self { argv })
        }
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// シェルで再実行可能な形に変換
    pub fn to_shell(&self) -> String {
        self.argv
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

/// POSIXシェル向けのクォート
///
/// 安全な文字だけで構成される引数はそのまま、それ以外はシングルクォートで囲みます。
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// コマンド文字列を引数に分割
///
/// シングルクォート（中身はリテラル）、ダブルクォート（`\"` と `\\` のみエスケープ）、
/// クォート外のバックスラッシュエスケープに対応します。
pub fn split_command_line(line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err(DefinitionError::UnterminatedQuote(line.to_string())),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') if matches!(chars.peek(), Some('"') | Some('\\')) => {
                            if let Some(escaped) = chars.next() {
                                current.push(escaped);
                            }
                        }
                        Some(inner) => current.push(inner),
                        None => return Err(DefinitionError::UnterminatedQuote(line.to_string())),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err(DefinitionError::TrailingBackslash(line.to_string())),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        args.push(current);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_plain() {
        assert_eq!(
            split_command_line("az group create  --name rg").unwrap(),
            vec!["az", "group", "create", "--name", "rg"]
        );
    }

    #[test]
    fn test_split_quotes() {
        assert_eq!(
            split_command_line(r#"az tag --tags 'env=prod team=a' "say \"hi\"" a\ b"#).unwrap(),
            vec!["az", "tag", "--tags", "env=prod team=a", r#"say "hi""#, "a b"]
        );
    }

    #[test]
    fn test_split_empty_quoted_arg() {
        assert_eq!(split_command_line("cmd ''").unwrap(), vec!["cmd", ""]);
    }

    #[test]
    fn test_split_unterminated() {
        assert!(matches!(
            split_command_line("echo 'oops"),
            Err(DefinitionError::UnterminatedQuote(_))
        ));
    }

    #[test]
    fn test_split_trailing_backslash() {
        assert!(matches!(
            split_command_line("cmd \\"),
            Err(DefinitionError::TrailingBackslash(_))
        ));
        assert_eq!(split_command_line(r"a\\ b").unwrap(), vec![r"a\", "b"]);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("--name"), "--name");
        assert_eq!(shell_quote("rg app"), "'rg app'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn test_command_line_display() {
        let cmd = CommandLine::new(vec![
            "az".to_string(),
            "group".to_string(),
            "delete".to_string(),
            "--name".to_string(),
            "my rg".to_string(),
        ])
        .unwrap();
        assert_eq!(cmd.program(), "az");
        assert_eq!(cmd.args().len(), 4);
        assert_eq!(cmd.to_string(), "az group delete --name 'my rg'");
    }

    #[test]
    fn test_command_line_rejects_empty() {
        assert!(CommandLine::new(vec![]).is_none());
        assert!(CommandLine::new(vec![String::new()]).is_none());

        assert!(serde_yaml::from_str::<CommandLine>("argv: []").is_err());
        assert!(serde_yaml::from_str::<CommandLine>("argv: ['']").is_err());
        let cmd: CommandLine = serde_yaml::from_str("argv: [az, login]").unwrap();
        assert_eq!(cmd.program(), "az");
    }
}
