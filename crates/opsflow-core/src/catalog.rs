//! 操作カタログ
//!
//! ディレクトリ配下の定義ファイルを全て読み込み、`operation.requires` に
//! よる操作間の依存関係を検証します。

use crate::definition::Definition;
use crate::graph::find_cycles;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// カタログ内の1操作
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub path: PathBuf,
    pub definition: Definition,
}

impl CatalogEntry {
    pub fn id(&self) -> &str {
        &self.definition.operation.id
    }

    pub fn requires(&self) -> Vec<&str> {
        self.definition
            .operation
            .requires
            .iter()
            .map(|r| r.operation_id())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

/// 存在しない操作への依存
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    pub operation_id: String,
    pub missing_id: String,
    pub path: PathBuf,
}

/// 依存関係の統計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub total_operations: usize,
    pub operations_with_deps: usize,
    pub total_dependencies: usize,
    pub max_dependencies: usize,
    pub most_dependent_op: Option<String>,
}

/// 読み込んだ操作定義の集合
#[derive(Debug, Default)]
pub struct Catalog {
    /// 操作ID順
    pub entries: BTreeMap<String, CatalogEntry>,
    /// 読み込みに失敗したファイルとエラー
    pub load_errors: Vec<(PathBuf, String)>,
    /// 重複したID（後から見つかったファイル）
    pub duplicates: Vec<(String, PathBuf)>,
}

impl Catalog {
    /// ディレクトリ（または単一ファイル）からカタログを構築
    #[tracing::instrument]
    pub fn load(path: &Path) -> Self {
        let mut catalog = Catalog::default();

        for file in definition_files(path) {
            let content = match std::fs::read_to_string(&file) {
                Ok(content) => content,
                Err(e) => {
                    catalog.load_errors.push((file, e.to_string()));
                    continue;
                }
            };

            // operation セクションの無いYAMLは定義ではないので無視
            match serde_yaml::from_str::<serde_yaml::Value>(&content) {
                Ok(value) if value.get("operation").is_some() => {}
                Ok(_) => {
                    tracing::debug!(path = %file.display(), "Skipping non-operation YAML");
                    continue;
                }
                Err(e) => {
                    catalog.load_errors.push((file, e.to_string()));
                    continue;
                }
            }

            match Definition::from_yaml_str(&content) {
                Ok(definition) => catalog.insert(file, definition),
                Err(e) => catalog.load_errors.push((file, e.to_string())),
            }
        }

        tracing::info!(
            operations = catalog.entries.len(),
            errors = catalog.load_errors.len(),
            duplicates = catalog.duplicates.len(),
            "Loaded operation catalog"
        );
        catalog
    }

    fn insert(&mut self, path: PathBuf, definition: Definition) {
        let id = definition.operation.id.clone();
        if self.entries.contains_key(&id) {
            tracing::warn!(operation_id = %id, path = %path.display(), "Duplicate operation id");
            self.duplicates.push((id, path));
        } else {
            self.entries.insert(id, CatalogEntry { path, definition });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    /// 存在しない操作を参照している `requires`
    pub fn missing_dependencies(&self) -> Vec<MissingDependency> {
        let mut missing = Vec::new();
        for entry in self.entries.values() {
            for dep in entry.requires() {
                if !self.entries.contains_key(dep) {
                    missing.push(MissingDependency {
                        operation_id: entry.id().to_string(),
                        missing_id: dep.to_string(),
                        path: entry.path.clone(),
                    });
                }
            }
        }
        missing
    }

    /// `requires` の循環
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let adjacency: BTreeMap<String, Vec<String>> = self
            .entries
            .iter()
            .map(|(id, entry)| {
                let deps = entry
                    .requires()
                    .into_iter()
                    .filter(|dep| self.entries.contains_key(*dep))
                    .map(str::to_string)
                    .collect();
                (id.clone(), deps)
            })
            .collect();
        find_cycles(&adjacency)
    }

    pub fn stats(&self) -> CatalogStats {
        let mut stats = CatalogStats {
            total_operations: self.entries.len(),
            ..Default::default()
        };
        for entry in self.entries.values() {
            let count = entry.requires().len();
            if count == 0 {
                continue;
            }
            stats.operations_with_deps += 1;
            stats.total_dependencies += count;
            if count > stats.max_dependencies {
                stats.max_dependencies = count;
                stats.most_dependent_op = Some(entry.id().to_string());
            }
        }
        stats
    }
}

/// 定義ファイルの一覧（`**/*.yaml`, `**/*.yml`、パス順）
pub fn definition_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    let mut files = Vec::new();
    for ext in ["yaml", "yml"] {
        let pattern = path.join("**").join(format!("*.{ext}"));
        let Some(pattern) = pattern.to_str() else {
            continue;
        };
        match glob::glob(pattern) {
            Ok(paths) => files.extend(paths.filter_map(|p| p.ok()).filter(|p| p.is_file())),
            Err(e) => tracing::warn!(error = %e, "Invalid glob pattern"),
        }
    }
    files.sort();
    files.dedup();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_op(dir: &Path, file: &str, id: &str, requires: &[&str]) {
        let requires = requires
            .iter()
            .map(|r| format!("\"{r}\""))
            .collect::<Vec<_>>()
            .join(", ");
        fs::write(
            dir.join(file),
            format!(
                "operation:\n  id: {id}\n  name: {id}\n  type: t\n  requires: [{requires}]\nsteps:\n  - name: s\n    command: [echo, {id}]\n"
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_load_and_stats() {
        let temp_dir = tempfile::tempdir().unwrap();
        let nested = temp_dir.path().join("networking/operations");
        fs::create_dir_all(&nested).unwrap();
        write_op(temp_dir.path(), "rg.yaml", "rg-create", &[]);
        write_op(&nested, "vnet.yml", "vnet-create", &["rg-create"]);
        write_op(&nested, "subnet.yaml", "subnet-create", &["rg-create", "vnet-create"]);
        fs::write(temp_dir.path().join("notes.yaml"), "title: not an operation\n").unwrap();

        let catalog = Catalog::load(temp_dir.path());
        assert_eq!(catalog.len(), 3);
        assert!(catalog.load_errors.is_empty());
        assert!(catalog.missing_dependencies().is_empty());
        assert!(catalog.cycles().is_empty());

        let stats = catalog.stats();
        assert_eq!(stats.total_operations, 3);
        assert_eq!(stats.operations_with_deps, 2);
        assert_eq!(stats.total_dependencies, 3);
        assert_eq!(stats.max_dependencies, 2);
        assert_eq!(stats.most_dependent_op.as_deref(), Some("subnet-create"));
    }

    #[test]
    fn test_missing_and_cycles() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_op(temp_dir.path(), "a.yaml", "a", &["b"]);
        write_op(temp_dir.path(), "b.yaml", "b", &["a", "ghost"]);

        let catalog = Catalog::load(temp_dir.path());
        let missing = catalog.missing_dependencies();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].operation_id, "b");
        assert_eq!(missing[0].missing_id, "ghost");
        assert_eq!(catalog.cycles(), vec![vec!["a", "b", "a"]]);
    }

    #[test]
    fn test_duplicates_and_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_op(temp_dir.path(), "a1.yaml", "a", &[]);
        write_op(temp_dir.path(), "a2.yaml", "a", &[]);
        fs::write(
            temp_dir.path().join("broken.yaml"),
            "operation: {id: x, name: X, type: t}\nsteps: []\n",
        )
        .unwrap();

        let catalog = Catalog::load(temp_dir.path());
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.duplicates.len(), 1);
        assert!(catalog.duplicates[0].1.ends_with("a2.yaml"));
        assert_eq!(catalog.load_errors.len(), 1);
    }
}
