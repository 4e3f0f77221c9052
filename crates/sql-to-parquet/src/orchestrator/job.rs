//! Export job: one target's resolve → read → unify → write chain.
//!
//! A job owns everything for its target (reader stream, unifier, writer) and
//! never shares state with other jobs. Every error is folded into the
//! returned [`ExportResult`]; nothing escapes to fail the run.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RunSettings;
use crate::core::{
    resolve, ExportTarget, ReadRequest, ResolvedObject, RowBatch, SourceReader, UnifiedSchema,
};
use crate::error::{ExportError, FailureKind, Result};
use crate::sink::ParquetFileWriter;
use crate::unify::SchemaUnifier;

/// Base delay between source read retries, multiplied by the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Lifecycle of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Pending,
    Resolving,
    Reading,
    Writing,
    Completed,
    Failed,
}

/// Why a target failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&ExportError> for FailureReason {
    fn from(err: &ExportError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Final outcome of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(FailureReason),
}

/// Per-target result recorded in the run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
    /// Output name from the configuration.
    pub name: String,
    /// Raw object reference from the configuration.
    pub object_ref: String,
    /// Resolved object, if resolution got that far.
    pub resolved: Option<ResolvedObject>,
    /// Rows in the finished file (0 on failure).
    pub rows_written: u64,
    pub outcome: Outcome,
    pub duration_ms: u64,
    /// Written file; `None` on failure or when the source reported no columns.
    pub file_path: Option<PathBuf>,
    /// Batches read in the successful attempt.
    pub batches: u64,
    /// Reader opens, including retries.
    pub attempts: u32,
}

impl ExportResult {
    /// A failure recorded without running the target.
    pub fn failed(target: &ExportTarget, err: &ExportError) -> Self {
        Self {
            name: target.name.clone(),
            object_ref: target.object_ref.clone(),
            resolved: None,
            rows_written: 0,
            outcome: Outcome::Failure(err.into()),
            duration_ms: 0,
            file_path: None,
            batches: 0,
            attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }

    /// Terminal state of the target.
    pub fn state(&self) -> TargetState {
        if self.is_success() {
            TargetState::Completed
        } else {
            TargetState::Failed
        }
    }

    /// Failure details, if the target failed.
    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.outcome {
            Outcome::Failure(reason) => Some(reason),
            Outcome::Success => None,
        }
    }
}

/// Output of one successful attempt.
struct JobOutput {
    rows: u64,
    batches: u64,
    file_path: Option<PathBuf>,
}

/// Runs one export target.
pub struct ExportJob {
    target: ExportTarget,
    output_path: PathBuf,
    settings: Arc<RunSettings>,
    reader: Arc<dyn SourceReader>,
    cancel: CancellationToken,
    state: TargetState,
    resolved: Option<ResolvedObject>,
    attempts: u32,
}

impl ExportJob {
    pub fn new(
        target: ExportTarget,
        output_path: PathBuf,
        settings: Arc<RunSettings>,
        reader: Arc<dyn SourceReader>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            output_path,
            settings,
            reader,
            cancel,
            state: TargetState::Pending,
            resolved: None,
            attempts: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> TargetState {
        self.state
    }

    /// Execute the job to completion.
    pub async fn run(mut self) -> ExportResult {
        let started = Instant::now();
        info!(target = %self.target.name, object = %self.target.object_ref, "export started");

        let result = self.execute().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (outcome, rows_written, batches, file_path) = match result {
            Ok(out) => {
                self.transition(TargetState::Completed);
                info!(
                    target = %self.target.name,
                    rows = out.rows,
                    batches = out.batches,
                    duration_ms,
                    "export completed"
                );
                (Outcome::Success, out.rows, out.batches, out.file_path)
            }
            Err(e) => {
                self.transition(TargetState::Failed);
                error!(target = %self.target.name, kind = %e.kind(), "export failed: {}", e);
                (Outcome::Failure((&e).into()), 0, 0, None)
            }
        };

        ExportResult {
            name: self.target.name,
            object_ref: self.target.object_ref,
            resolved: self.resolved,
            rows_written,
            outcome,
            duration_ms,
            file_path,
            batches,
            attempts: self.attempts,
        }
    }

    fn transition(&mut self, next: TargetState) {
        debug!(target = %self.target.name, from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    async fn execute(&mut self) -> Result<JobOutput> {
        if self.cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        self.transition(TargetState::Resolving);
        let resolved = resolve(&self.target.object_ref, &self.settings.default_schema)?;
        self.resolved = Some(resolved.clone());

        loop {
            match self.attempt(&resolved).await {
                Ok(out) => return Ok(out),
                Err(e)
                    if e.is_retryable()
                        && self.attempts <= self.settings.max_retries
                        && !self.cancel.is_cancelled() =>
                {
                    let delay = RETRY_BACKOFF * self.attempts;
                    warn!(
                        target = %self.target.name,
                        attempt = self.attempts,
                        max_retries = self.settings.max_retries,
                        "source read failed, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(ExportError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One full read/write pass. The writer is discarded on any error.
    async fn attempt(&mut self, resolved: &ResolvedObject) -> Result<JobOutput> {
        self.attempts += 1;
        let mut writer: Option<ParquetFileWriter> = None;

        let batches = match self.pump(resolved, &mut writer).await {
            Ok(batches) => batches,
            Err(e) => {
                if let Some(w) = writer.take() {
                    w.abort();
                }
                return Err(e);
            }
        };

        let Some(w) = writer else {
            warn!(target = %self.target.name, "source reported no columns; no file written");
            return Ok(JobOutput {
                rows: 0,
                batches,
                file_path: None,
            });
        };

        let rows = blocking(&self.output_path, move || w.close()).await?;
        Ok(JobOutput {
            rows,
            batches,
            file_path: Some(self.output_path.clone()),
        })
    }

    /// Stream batches from the reader into the writer until exhausted.
    async fn pump(
        &mut self,
        resolved: &ResolvedObject,
        writer: &mut Option<ParquetFileWriter>,
    ) -> Result<u64> {
        self.transition(TargetState::Reading);

        let request = ReadRequest::new(
            resolved.clone(),
            self.target.filter.clone(),
            self.settings.batch_size,
        );
        let mut stream = self.reader.open(request).await?;
        if !stream.is_ordered() {
            debug!(target = %self.target.name, "reading without a stable order");
        }

        let mut unifier = SchemaUnifier::new(self.settings.force_nullable);
        let mut batches = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ExportError::Cancelled),
                next = stream.next_batch() => next?,
            };
            let Some(batch) = next else { break };
            if batch.is_empty() {
                continue;
            }

            batches += 1;
            let count = batch.len();
            let rows = unifier.push(batch)?;

            let mut w = match writer.take() {
                Some(w) => w,
                None => {
                    self.open_writer(unifier.schema().cloned().unwrap_or_default())
                        .await?
                }
            };

            let (w, appended) = tokio::task::spawn_blocking(move || {
                let res = w.append(rows);
                (w, res)
            })
            .await
            .map_err(|e| ExportError::write(&self.output_path, format!("writer task failed: {}", e)))?;
            *writer = Some(w);
            appended?;

            debug!(target = %self.target.name, batch = batches, rows = count, "batch written");
        }

        if writer.is_none() {
            // No rows: a zero-row file still replaces whatever an earlier run left.
            match stream.columns().filter(|c| !c.is_empty()) {
                Some(columns) => {
                    warn!(target = %self.target.name, "object returned no rows");
                    unifier.push(RowBatch::new(columns.to_vec(), Vec::new()))?;
                    let schema = unifier.schema().cloned().unwrap_or_default();
                    *writer = Some(self.open_writer(schema).await?);
                }
                None => self.remove_stale_output().await?,
            }
        }

        Ok(batches)
    }

    async fn open_writer(&mut self, schema: UnifiedSchema) -> Result<ParquetFileWriter> {
        let path = self.output_path.clone();
        let options = self.settings.writer.clone();
        self.transition(TargetState::Writing);
        blocking(&self.output_path, move || {
            ParquetFileWriter::open(&path, &schema, &options)
        })
        .await
    }

    async fn remove_stale_output(&self) -> Result<()> {
        let path = self.output_path.clone();
        blocking(&self.output_path, move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ExportError::write(&path, e)),
        })
        .await
    }
}

/// Run blocking file work off the async runtime.
async fn blocking<T, F>(path: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExportError::write(path, format!("writer task failed: {}", e)))?
}
