//! Batch sequencing over a directory of scripts.
//!
//! Scripts run strictly one at a time in file-name order. A failing script
//! does not stop the batch; losing the transport does, and every script
//! after that point is reported as skipped.

use crate::obs;
use crate::result::{FailureKind, Outcome, ScenarioResult, SkipReason};
use crate::runner::ScenarioRunner;
use crate::script::{load_script, LoadError, SCRIPT_EXTENSION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("scenario path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read scenario directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type BatchResult<T> = std::result::Result<T, BatchError>;

/// `*.script` files directly inside `dir`, sorted by file name.
pub fn discover_scripts(dir: &Path) -> BatchResult<Vec<PathBuf>> {
    let read_err = |source| BatchError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        let is_script = path
            .extension()
            .is_some_and(|ext| ext == SCRIPT_EXTENSION);
        if is_script && path.is_file() {
            scripts.push(path);
        }
    }
    scripts.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(scripts)
}

/// Results of a batch, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<ScenarioResult>,
    /// The transport was lost and the remaining scripts were skipped.
    pub aborted: bool,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn completed_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Completed))
    }

    /// Failed or timed-out scenarios.
    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. } | Outcome::TimedOut { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Runs single scripts or whole directories through a [`ScenarioRunner`].
pub struct BatchSequencer {
    runner: ScenarioRunner,
}

impl BatchSequencer {
    pub fn new(runner: ScenarioRunner) -> Self {
        Self { runner }
    }

    /// Run a single script file or every script in a directory.
    pub async fn launch(&self, path: &Path) -> BatchResult<BatchReport> {
        if path.is_dir() {
            self.run_batch(path).await
        } else if path.is_file() {
            Ok(self.run_single(path).await)
        } else {
            Err(BatchError::NotFound(path.to_path_buf()))
        }
    }

    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn run_batch(&self, dir: &Path) -> BatchResult<BatchReport> {
        let scripts = discover_scripts(dir)?;
        info!(scripts = scripts.len(), "starting batch");
        Ok(self.run_paths(&scripts).await)
    }

    pub async fn run_single(&self, path: &Path) -> BatchReport {
        self.run_paths(&[path.to_path_buf()]).await
    }

    /// Run `paths` in the given order.
    pub async fn run_paths(&self, paths: &[PathBuf]) -> BatchReport {
        let cancel = self.runner.cancel_signal();
        let delay = self.runner.config().inter_scenario_delay();
        let mut report = BatchReport::default();
        let mut previous_ran = false;

        for path in paths {
            if report.aborted {
                report
                    .results
                    .push(ScenarioResult::skipped(path, SkipReason::BatchAborted));
                continue;
            }
            if cancel.is_cancelled() {
                report
                    .results
                    .push(ScenarioResult::skipped(path, SkipReason::Cancelled));
                continue;
            }

            if previous_ran && !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report
                            .results
                            .push(ScenarioResult::skipped(path, SkipReason::Cancelled));
                        continue;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let result = self.run_file(path).await;
            previous_ran = result.final_state.is_some();
            if result.outcome.is_fatal() {
                warn!(scenario = %result.name(), "transport lost, aborting batch");
                report.aborted = true;
            }
            report.results.push(result);
        }

        obs::emit_batch_finished(
            report.total(),
            report.completed_count(),
            report.failed_count(),
            report.skipped_count(),
            report.aborted,
        );
        report
    }

    /// Load, parse and run one file. Load failures become `Failed` results.
    pub async fn run_file(&self, path: &Path) -> ScenarioResult {
        match load_script(path) {
            Ok(script) => self.runner.run(&script).await,
            Err(LoadError::Parse { source, .. }) => {
                warn!(path = %path.display(), error = %source, "script rejected");
                ScenarioResult::not_run(path, Outcome::failed(FailureKind::Parse, source.to_string()))
            }
            Err(err @ LoadError::Io { .. }) => {
                warn!(error = %err, "script unreadable");
                ScenarioResult::not_run(path, Outcome::failed(FailureKind::Io, err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_sorts_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.script", "a.script", "c.txt", "10.script"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.script")).unwrap();

        let names: Vec<String> = discover_scripts(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["10.script", "a.script", "b.script"]);
    }

    #[test]
    fn test_discover_missing_dir() {
        let err = discover_scripts(Path::new("/nonexistent/scenarios")).unwrap_err();
        assert!(matches!(err, BatchError::ReadDir { .. }));
    }

    #[test]
    fn test_report_counts() {
        let report = BatchReport {
            results: vec![
                ScenarioResult::not_run("a.script", Outcome::Completed),
                ScenarioResult::not_run("b.script", Outcome::TimedOut { waited_ms: 1 }),
                ScenarioResult::skipped("c.script", SkipReason::BatchAborted),
            ],
            aborted: true,
        };
        assert_eq!(report.total(), 3);
        assert_eq!(report.completed_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.skipped_count(), 1);
    }
}
