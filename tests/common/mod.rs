//! Shared fixture: a real git repository laid out as a lumenflow workspace,
//! with the remote disabled so pipelines run offline.

use std::path::{Path, PathBuf};
use std::process::Command;

use lumenflow::pipeline::Workspace;
use lumenflow::wu::{WorkUnit, WuId, WuStatus, WuStore, WuType};

pub struct TestWorkspace {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    /// A repository with one committed source file and a passing gate chain.
    pub fn new() -> Self {
        Self::with_gates(&[("test", "true")])
    }

    pub fn with_gates(gates: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();

        let ws = Self { _dir: dir, root };
        ws.git(&["init", "-b", "main"]);
        ws.git(&["config", "user.email", "test@example.com"]);
        ws.git(&["config", "user.name", "Test"]);

        let mut config = String::from("[git]\nrequire_remote = false\n\n[gates.commands]\n");
        for (gate, command) in gates {
            config.push_str(&format!("{gate} = \"{command}\"\n"));
        }
        ws.write(".lumenflow.toml", &config);
        ws.write("src/app.txt", "line one\n");
        std::fs::create_dir_all(ws.root.join("docs/04-operations/tasks/wu")).unwrap();
        ws.write("docs/04-operations/tasks/wu/.gitkeep", "");
        ws.git(&["add", "-A"]);
        ws.git(&["commit", "-m", "init"]);
        ws
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::discover(&self.root).unwrap()
    }

    pub fn git(&self, args: &[&str]) -> String {
        self.git_in(&self.root, args)
    }

    pub fn git_in(&self, dir: &Path, args: &[&str]) -> String {
        let out = Command::new("git").args(args).current_dir(dir).output().unwrap();
        assert!(
            out.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).into_owned()
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.root.join(rel)).unwrap()
    }

    pub fn store(&self) -> WuStore {
        WuStore::new(
            self.root.join("docs/04-operations/tasks/wu"),
            "lumenflow.local",
        )
    }

    /// Save a ready WU and commit it, as a human would before claiming.
    pub fn seed_wu(&self, id: u32, lane: &str, code_paths: &[&str]) -> WorkUnit {
        let wu = WorkUnit {
            id: WuId(id),
            title: format!("Task {id}"),
            lane: lane.to_string(),
            wu_type: WuType::Feature,
            status: WuStatus::Ready,
            created: "2024-01-01".into(),
            priority: None,
            assigned_to: None,
            code_paths: code_paths.iter().map(|s| (*s).to_string()).collect(),
            acceptance: Vec::new(),
            notes: Vec::new(),
            initiative: None,
            phase: None,
            claimed_branch: None,
            worktree_path: None,
        };
        self.store().save(&wu).unwrap();
        self.git(&["add", "-A"]);
        self.git(&["commit", "-m", &format!("add WU-{id}")]);
        wu
    }

    /// Commit a change inside a worktree.
    pub fn commit_in_worktree(&self, worktree: &Path, rel: &str, contents: &str, message: &str) {
        let path = worktree.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
        self.git_in(worktree, &["add", "-A"]);
        self.git_in(worktree, &["commit", "-m", message]);
    }
}
