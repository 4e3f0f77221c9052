//! Export orchestrator - drives every target of a run.

mod job;

pub use job::{ExportJob, ExportResult, FailureReason, Outcome, TargetState};

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RunSettings;
use crate::core::{ExportTarget, SourceReader};
use crate::error::{ExportError, FailureKind, Result};

/// Export orchestrator.
///
/// Holds the source reader for the run. Targets are exported on a bounded
/// worker pool (one worker means strictly sequential, in configuration
/// order); a failed target is recorded and the run carries on.
pub struct Orchestrator {
    reader: Arc<dyn SourceReader>,
}

/// Result of an export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// One result per target, in configuration order.
    pub results: Vec<ExportResult>,

    /// Rows written across all completed targets.
    pub total_rows_written: u64,

    /// Wall-clock duration of the run.
    pub total_duration_ms: u64,
}

impl RunSummary {
    /// Targets that completed.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Targets that failed.
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Source connectivity report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_type: String,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub healthy: bool,
}

enum Slot {
    Done(ExportResult),
    Running {
        target: ExportTarget,
        handle: JoinHandle<ExportResult>,
    },
}

impl Orchestrator {
    /// Create a new orchestrator over a source reader.
    pub fn new(reader: Arc<dyn SourceReader>) -> Self {
        Self { reader }
    }

    /// Export every target and summarize the outcome.
    ///
    /// Only run-level problems (no targets, unusable output directory) are
    /// returned as errors; per-target failures land in the summary.
    pub async fn run(
        &self,
        targets: Vec<ExportTarget>,
        settings: &RunSettings,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        if targets.is_empty() {
            return Err(ExportError::NoTargets);
        }
        prepare_output_dir(&settings.data_dir)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let started = Instant::now();
        let workers = settings.workers.max(1);

        info!(
            run_id = %run_id,
            targets = targets.len(),
            workers,
            data_dir = %settings.data_dir.display(),
            "Starting export run"
        );

        let settings = Arc::new(settings.clone());
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut seen_paths = HashSet::new();
        let mut slots = Vec::with_capacity(targets.len());

        for target in targets {
            let path = settings.output_path(&target.name);
            // Case-insensitive filesystems map `Orders` and `orders` to one file.
            if !seen_paths.insert(path.to_string_lossy().to_lowercase()) {
                let err = ExportError::InvalidConfiguration(format!(
                    "output path {} is already used by an earlier object",
                    path.display()
                ));
                warn!(target = %target.name, "{}", err);
                slots.push(Slot::Done(ExportResult::failed(&target, &err)));
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                slots.push(Slot::Done(ExportResult::failed(&target, &ExportError::Cancelled)));
                continue;
            };

            let job = ExportJob::new(
                target.clone(),
                path,
                settings.clone(),
                self.reader.clone(),
                cancel.clone(),
            );
            let handle = tokio::spawn(async move {
                let result = job.run().await;
                drop(permit);
                result
            });
            slots.push(Slot::Running { target, handle });
        }

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            let result = match slot {
                Slot::Done(result) => result,
                Slot::Running { target, handle } => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(target = %target.name, "export task panicked: {}", e);
                        let mut result = ExportResult::failed(
                            &target,
                            &ExportError::write(
                                settings.output_path(&target.name),
                                format!("export task panicked: {}", e),
                            ),
                        );
                        result.attempts = 1;
                        result
                    }
                },
            };
            results.push(result);
        }

        let summary = RunSummary {
            run_id,
            started_at,
            completed_at: Utc::now(),
            total_rows_written: results.iter().map(|r| r.rows_written).sum(),
            total_duration_ms: started.elapsed().as_millis() as u64,
            results,
        };

        let cancelled = summary
            .results
            .iter()
            .filter(|r| r.failure().map(|f| f.kind) == Some(FailureKind::Cancelled))
            .count();
        if cancelled > 0 {
            warn!("{} objects cancelled", cancelled);
        }
        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            rows = summary.total_rows_written,
            duration_ms = summary.total_duration_ms,
            "Export run finished"
        );

        Ok(summary)
    }

    /// Check source connectivity.
    pub async fn health_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = self.reader.test_connection().await;
        let latency = started.elapsed().as_millis() as u64;

        HealthCheckResult {
            source_type: self.reader.db_type().to_string(),
            source_connected: outcome.is_ok(),
            source_latency_ms: latency,
            source_error: outcome.as_ref().err().map(|e| e.to_string()),
            healthy: outcome.is_ok(),
        }
    }

    /// Release source connections.
    pub async fn close(&self) {
        self.reader.close().await;
    }
}

/// Create the output directory and check it accepts new files.
fn prepare_output_dir(dir: &Path) -> Result<()> {
    let as_output_err = |source| ExportError::OutputDir {
        path: dir.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(as_output_err)?;

    let probe = dir.join(format!(".sql-to-parquet-{}.probe", uuid::Uuid::new_v4()));
    fs::write(&probe, b"").map_err(as_output_err)?;
    fs::remove_file(&probe).map_err(as_output_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlValue;
    use crate::drivers::MemoryReader;
    use tempfile::tempdir;

    fn reader() -> Arc<MemoryReader> {
        let rows = (0..4).map(|i| vec![SqlValue::Int(i)]).collect();
        Arc::new(MemoryReader::new().with_table("dbo.A", &["id"], rows))
    }

    #[tokio::test]
    async fn test_no_targets_is_fatal() {
        let dir = tempdir().unwrap();
        let err = Orchestrator::new(reader())
            .run(vec![], &RunSettings::new(dir.path(), 10), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::NoTargets));
    }

    #[tokio::test]
    async fn test_output_dir_that_is_a_file_is_fatal() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();

        let err = Orchestrator::new(reader())
            .run(
                vec![ExportTarget::new("a", "A", None)],
                &RunSettings::new(&file, 10),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::OutputDir { .. }));
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_output_path_fails_later_target() {
        let dir = tempdir().unwrap();
        let summary = Orchestrator::new(reader())
            .run(
                vec![
                    ExportTarget::new("a", "A", None),
                    ExportTarget::new("a", "dbo.A", None),
                ],
                &RunSettings::new(dir.path(), 10),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(summary.results[0].is_success());
        let failure = summary.results[1].failure().unwrap();
        assert_eq!(failure.kind, FailureKind::InvalidConfiguration);
        assert_eq!(summary.total_rows_written, 4);
    }

    #[tokio::test]
    async fn test_output_names_differing_only_in_case_collide() {
        let dir = tempdir().unwrap();
        let summary = Orchestrator::new(reader())
            .run(
                vec![
                    ExportTarget::new("orders", "A", None),
                    ExportTarget::new("Orders", "A", None),
                ],
                &RunSettings::new(dir.path(), 10),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(summary.results[0].is_success());
        let failure = summary.results[1].failure().unwrap();
        assert_eq!(failure.kind, FailureKind::InvalidConfiguration);
        assert!(!dir.path().join("Orders.parquet.partial").exists());
        assert_eq!(summary.succeeded(), 1);
    }

    #[tokio::test]
    async fn test_creates_missing_output_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let summary = Orchestrator::new(reader())
            .run(
                vec![ExportTarget::new("a", "A", None)],
                &RunSettings::new(&nested, 10),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(summary.all_succeeded());
        assert!(nested.join("a.parquet").exists());
        assert_eq!(fs::read_dir(&nested).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let result = Orchestrator::new(reader()).health_check().await;
        assert!(result.healthy);
        assert_eq!(result.source_type, "memory");
    }

    #[test]
    fn test_summary_json() {
        let summary = RunSummary {
            run_id: "r".into(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            results: vec![ExportResult::failed(
                &ExportTarget::new("x", "", None),
                &ExportError::InvalidConfiguration("empty".into()),
            )],
            total_rows_written: 0,
            total_duration_ms: 0,
        };
        let json = summary.to_json().unwrap();
        assert!(json.contains("\"status\": \"failure\""));
        assert!(json.contains("\"kind\": \"invalid_configuration\""));
        assert_eq!(summary.failed(), 1);
    }
}
