//! Gate chain execution.
//!
//! Gates are external validators (format, lint, typecheck, test, coverage)
//! configured as shell commands and run in order with the worktree as the
//! working directory. The chain stops at the first failure unless
//! `fail_fast = false`.
//!
//! In agent mode (stdout not a terminal, `CI` unset, `--verbose` absent) the
//! full output goes to a log file and stdout gets a one-line summary per
//! gate, bounded to ~500 characters total; interactive terminals get the
//! full output.

mod risk;

pub use risk::{RiskTier, classify, touches_safety_paths};

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use wait_timeout::ChildExt;

use crate::config::GatesConfig;
use crate::interrupt;
use crate::styling::{self, format_with_gutter};

/// Name of the gate substituted for `test` on docs-only changes.
const SAFETY_TEST_GATE: &str = "safety-test";

/// Template variables available to gate commands.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GateVars {
    pub wu: String,
    pub lane: String,
    pub branch: String,
    pub worktree: String,
    pub base: String,
}

/// Result of one gate.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GateOutcome {
    pub gate: String,
    pub passed: bool,
    /// `None` when the gate was killed by timeout or a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

/// Aggregate over the whole chain.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GateReport {
    pub passed: bool,
    pub passed_count: usize,
    pub failed_count: usize,
    pub total_duration_ms: u64,
    pub results: Vec<GateOutcome>,
    #[serde(serialize_with = "serialize_tier")]
    pub risk: RiskTier,
    pub skipped: Vec<String>,
    /// Agent-mode log file holding the full output, when one was written.
    pub log_path: Option<PathBuf>,
}

fn serialize_tier<S: serde::Serializer>(tier: &RiskTier, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&tier.to_string())
}

impl GateReport {
    pub fn first_failure(&self) -> Option<&GateOutcome> {
        self.results.iter().find(|r| !r.passed)
    }
}

#[derive(Debug)]
pub struct GateRunner<'a> {
    config: &'a GatesConfig,
    worktree: &'a Path,
    vars: GateVars,
    log_dir: PathBuf,
    verbose: bool,
}

impl<'a> GateRunner<'a> {
    pub fn new(
        config: &'a GatesConfig,
        worktree: &'a Path,
        vars: GateVars,
        log_dir: impl Into<PathBuf>,
        verbose: bool,
    ) -> Self {
        Self {
            config,
            worktree,
            vars,
            log_dir: log_dir.into(),
            verbose,
        }
    }

    /// Run the configured chain against `changed_files`.
    pub fn run(&self, changed_files: &[String]) -> anyhow::Result<GateReport> {
        let tier = classify(changed_files, self.config);
        let safety_override = touches_safety_paths(changed_files, self.config);
        let agent_mode = self.agent_mode();

        let mut results = Vec::new();
        let mut skipped = Vec::new();
        let started = Instant::now();

        for gate in &self.config.order {
            interrupt::check()?;

            // Docs-only changes skip the test gate; safety-critical paths
            // still get the safety-test command when one is configured.
            let effective: &str = if gate == "test" && tier == RiskTier::DocsOnly && !safety_override
            {
                if self.config.commands.contains_key(SAFETY_TEST_GATE) {
                    SAFETY_TEST_GATE
                } else {
                    skipped.push(gate.clone());
                    continue;
                }
            } else {
                gate
            };

            let Some(template) = self.config.commands.get(effective) else {
                skipped.push(effective.to_string());
                continue;
            };
            let command = self.expand(template)?;
            let outcome = self.run_one(effective, &command)?;
            let failed = !outcome.passed;
            results.push(outcome);
            if failed && self.config.fail_fast {
                break;
            }
        }

        let passed_count = results.iter().filter(|r| r.passed).count();
        let failed_count = results.len() - passed_count;
        let mut report = GateReport {
            passed: failed_count == 0,
            passed_count,
            failed_count,
            total_duration_ms: started.elapsed().as_millis() as u64,
            results,
            risk: tier,
            skipped,
            log_path: None,
        };

        if agent_mode {
            report.log_path = self.write_log(&report).ok();
            self.print_compact(&report);
        } else {
            self.print_full(&report);
        }
        Ok(report)
    }

    fn agent_mode(&self) -> bool {
        !std::io::stdout().is_terminal() && std::env::var_os("CI").is_none() && !self.verbose
    }

    fn expand(&self, template: &str) -> anyhow::Result<String> {
        let env = minijinja::Environment::new();
        env.render_str(template, &self.vars)
            .with_context(|| format!("expanding gate command {template:?}"))
    }

    fn run_one(&self, gate: &str, command: &str) -> anyhow::Result<GateOutcome> {
        log::debug!("$ {command} [gate:{gate}]");
        let started = Instant::now();
        let mut child = crate::shell_exec::shell_command(command)
            .current_dir(self.worktree)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn gate {gate}: {command}"))?;

        // Drain pipes on threads so a chatty gate can't deadlock on a full
        // pipe while we wait on it.
        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
        let stdout_thread = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stdout_pipe.read_to_string(&mut buf);
            buf
        });
        let stderr_thread = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf);
            buf
        });

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let (status, timed_out) = match child.wait_timeout(timeout)? {
            Some(status) => (Some(status), false),
            None => {
                child.kill().ok();
                (child.wait().ok(), true)
            }
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();
        let exit_code = status.and_then(|s| s.code());
        let passed = !timed_out && status.map(|s| s.success()).unwrap_or(false);
        let duration = started.elapsed();

        crate::command_log::record(
            &format!("gate:{gate}"),
            Some(self.vars.wu.as_str()),
            command,
            exit_code,
            Some(duration),
        );

        Ok(GateOutcome {
            gate: gate.to_string(),
            passed,
            exit_code,
            stdout,
            stderr,
            duration_ms: duration.as_millis() as u64,
            timed_out,
        })
    }

    /// Full output to `<log_dir>/gates-<YYYYMMDD-HHMMSS>-<lane>-<wu>.log`.
    fn write_log(&self, report: &GateReport) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.log_dir)?;
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let name = format!(
            "gates-{stamp}-{}-{}.log",
            crate::path::kebab_case(&self.vars.lane),
            self.vars.wu.to_lowercase()
        );
        let path = self.log_dir.join(name);
        let mut out = String::new();
        for result in &report.results {
            out.push_str(&format!(
                "==== gate {} ({}, {}ms) ====\n",
                result.gate,
                if result.passed { "passed" } else { "failed" },
                result.duration_ms
            ));
            out.push_str(&result.stdout);
            if !result.stderr.is_empty() {
                out.push_str("\n--- stderr ---\n");
                out.push_str(&result.stderr);
            }
            out.push('\n');
        }
        std::fs::write(&path, out)?;
        Ok(path)
    }

    /// One line per gate, ≤500 characters total.
    fn print_compact(&self, report: &GateReport) {
        let mut budget: usize = 500;
        for result in &report.results {
            let mark = if result.passed { "ok" } else { "FAIL" };
            let line = format!(
                "gate {} {} ({}ms)",
                result.gate, mark, result.duration_ms
            );
            if line.len() + 1 > budget {
                break;
            }
            budget -= line.len() + 1;
            styling::println!("{line}");
        }
        if let Some(path) = &report.log_path {
            let line = format!("full output: {}", path.display());
            if line.len() <= budget {
                styling::println!("{line}");
            }
        }
    }

    fn print_full(&self, report: &GateReport) {
        for result in &report.results {
            if result.passed {
                styling::eprintln!(
                    "{}",
                    styling::success_message(format!(
                        "gate {} passed ({}ms)",
                        result.gate, result.duration_ms
                    ))
                );
            } else {
                styling::eprintln!(
                    "{}",
                    styling::error_message(format!("gate {} failed", result.gate))
                );
                let combined = [result.stdout.trim(), result.stderr.trim()]
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                if !combined.is_empty() {
                    styling::eprintln!("{}", format_with_gutter(&combined));
                }
            }
        }
        for gate in &report.skipped {
            styling::eprintln!(
                "{}",
                styling::hint_message(format!("gate {gate} skipped (no command configured)"))
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn vars() -> GateVars {
        GateVars {
            wu: "WU-7".into(),
            lane: "Framework: Core".into(),
            branch: "lane/framework-core/wu-7".into(),
            worktree: "/tmp/wt".into(),
            base: "origin/main".into(),
        }
    }

    fn config_with(commands: &[(&str, &str)]) -> GatesConfig {
        let mut cfg = GatesConfig::default();
        cfg.commands = commands
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect::<IndexMap<_, _>>();
        cfg.timeout_secs = 10;
        cfg
    }

    #[test]
    fn chain_runs_in_order_and_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_with(&[("format", "true"), ("lint", "true"), ("test", "true")]);
        let runner = GateRunner::new(&cfg, dir.path(), vars(), dir.path().join(".logs"), false);
        let report = runner.run(&["src/lib.rs".to_string()]).unwrap();
        assert!(report.passed);
        assert_eq!(report.passed_count, 3);
        assert_eq!(report.failed_count, 0);
        let order: Vec<&str> = report.results.iter().map(|r| r.gate.as_str()).collect();
        assert_eq!(order, vec!["format", "lint", "test"]);
        // typecheck and coverage had no command
        assert!(report.skipped.contains(&"typecheck".to_string()));
    }

    #[test]
    fn fail_fast_stops_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_with(&[("format", "true"), ("lint", "false"), ("test", "true")]);
        let runner = GateRunner::new(&cfg, dir.path(), vars(), dir.path().join(".logs"), false);
        let report = runner.run(&["src/lib.rs".to_string()]).unwrap();
        assert!(!report.passed);
        assert_eq!(report.failed_count, 1);
        // test never ran
        assert!(!report.results.iter().any(|r| r.gate == "test"));
        assert_eq!(report.first_failure().unwrap().gate, "lint");
    }

    #[test]
    fn no_fail_fast_runs_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_with(&[("format", "false"), ("lint", "false"), ("test", "true")]);
        cfg.fail_fast = false;
        let runner = GateRunner::new(&cfg, dir.path(), vars(), dir.path().join(".logs"), false);
        let report = runner.run(&["src/lib.rs".to_string()]).unwrap();
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.failed_count, 2);
        assert_eq!(report.passed_count, 1);
    }

    #[test]
    fn docs_only_skips_test_gate() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_with(&[("test", "false")]);
        let runner = GateRunner::new(&cfg, dir.path(), vars(), dir.path().join(".logs"), false);
        // The only configured gate would fail, but it's skipped for docs-only
        let report = runner.run(&["docs/guide.md".to_string()]).unwrap();
        assert!(report.passed);
        assert_eq!(report.risk, RiskTier::DocsOnly);
        assert!(report.skipped.contains(&"test".to_string()));
    }

    #[test]
    fn docs_only_with_safety_paths_still_tests() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_with(&[("test", "false")]);
        let runner = GateRunner::new(&cfg, dir.path(), vars(), dir.path().join(".logs"), false);
        let report = runner.run(&["docs/safety-manual.md".to_string()]).unwrap();
        assert!(!report.passed);
        assert_eq!(report.results[0].gate, "test");
    }

    #[test]
    fn commands_capture_output_and_expand_templates() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_with(&[("lint", "echo checking {{ wu }} on {{ branch }}")]);
        let runner = GateRunner::new(&cfg, dir.path(), vars(), dir.path().join(".logs"), false);
        let report = runner.run(&["src/lib.rs".to_string()]).unwrap();
        assert!(report.passed);
        assert_eq!(
            report.results[0].stdout.trim(),
            "checking WU-7 on lane/framework-core/wu-7"
        );
    }

    #[test]
    fn timeout_kills_and_fails_the_gate() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_with(&[("test", "sleep 5")]);
        cfg.timeout_secs = 1;
        let runner = GateRunner::new(&cfg, dir.path(), vars(), dir.path().join(".logs"), false);
        let started = Instant::now();
        let report = runner.run(&["src/lib.rs".to_string()]).unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!report.passed);
        assert!(report.results[0].timed_out);
    }

    #[test]
    fn gate_cwd_is_the_worktree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let cfg = config_with(&[("lint", "cat marker.txt")]);
        let runner = GateRunner::new(&cfg, dir.path(), vars(), dir.path().join(".logs"), false);
        let report = runner.run(&["src/lib.rs".to_string()]).unwrap();
        assert!(report.passed);
        assert_eq!(report.results[0].stdout.trim(), "here");
    }
}
