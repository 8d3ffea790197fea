use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// 一時ディレクトリ上のプロジェクト（設定ファイル + 状態DB + 操作定義）
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join("opsflow.yaml"),
            "variables:\n  RESOURCE_GROUP: rg-test\nstate:\n  database: .opsflow/state.db\n",
        )
        .unwrap();
        Self { root }
    }

    pub fn write_definition(&self, name: &str, content: &str) -> PathBuf {
        let dir = self.root.path().join("operations");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.yaml", name));
        fs::write(&path, content).unwrap();
        path
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// プロジェクトの設定を使う `ops` コマンド
    #[allow(deprecated)]
    pub fn ops(&self) -> Command {
        let mut cmd = Command::cargo_bin("ops").unwrap();
        cmd.current_dir(self.path())
            .env("OPSFLOW_CONFIG_PATH", self.path().join("opsflow.yaml"))
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG");
        cmd
    }
}
