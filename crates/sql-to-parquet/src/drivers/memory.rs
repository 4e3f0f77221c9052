//! In-memory source reader.
//!
//! Serves fixed tables through the same batch channel as the database
//! readers, with optional injected failures. Filters are not evaluated.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::{BatchStream, ReadRequest, RowBatch, SourceReader, SqlValue};
use crate::error::{ExportError, Result};

/// Injected failure for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// The first `n` opens fail.
    Open(u32),
    /// The stream errors after yielding `n` batches.
    AfterBatches(usize),
}

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    ordered: bool,
    fault: Option<Fault>,
}

/// A [`SourceReader`] over tables held in memory, keyed by `schema.object`.
#[derive(Debug, Default)]
pub struct MemoryReader {
    tables: HashMap<String, MemoryTable>,
    opens: Mutex<HashMap<String, u32>>,
    batch_delay: Option<Duration>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with a primary key (ordered reads).
    pub fn with_table(
        mut self,
        name: &str,
        columns: &[&str],
        rows: Vec<Vec<SqlValue>>,
    ) -> Self {
        self.tables.insert(
            name.to_string(),
            MemoryTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
                ordered: true,
                fault: None,
            },
        );
        self
    }

    /// Add a table without a key; streams report themselves unordered.
    pub fn with_view(self, name: &str, columns: &[&str], rows: Vec<Vec<SqlValue>>) -> Self {
        let mut reader = self.with_table(name, columns, rows);
        if let Some(t) = reader.tables.get_mut(name) {
            t.ordered = false;
        }
        reader
    }

    /// Fail the first `times` opens of a table.
    pub fn fail_open(mut self, name: &str, times: u32) -> Self {
        if let Some(t) = self.tables.get_mut(name) {
            t.fault = Some(Fault::Open(times));
        }
        self
    }

    /// Abort a table's stream after `batches` batches.
    pub fn fail_after(mut self, name: &str, batches: usize) -> Self {
        if let Some(t) = self.tables.get_mut(name) {
            t.fault = Some(Fault::AfterBatches(batches));
        }
        self
    }

    /// Sleep before each batch is sent.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = Some(delay);
        self
    }

    /// Number of times a table has been opened.
    pub fn open_count(&self, name: &str) -> u32 {
        self.opens
            .lock()
            .map(|m| m.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record_open(&self, name: &str) -> u32 {
        match self.opens.lock() {
            Ok(mut m) => {
                let count = m.entry(name.to_string()).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl SourceReader for MemoryReader {
    async fn open(&self, request: ReadRequest) -> Result<BatchStream> {
        let name = request.object.to_string();
        let attempt = self.record_open(&name);

        let table = self.tables.get(&name).ok_or_else(|| {
            ExportError::source_read(&name, format!("Invalid object name '{}'", name))
        })?;

        if let Some(Fault::Open(times)) = table.fault {
            if attempt <= times {
                return Err(ExportError::source_read(&name, "connection reset by peer"));
            }
        }

        let fail_after = match table.fault {
            Some(Fault::AfterBatches(n)) => Some(n),
            _ => None,
        };
        let columns = table.columns.clone();
        let mut chunks: Vec<Vec<Vec<SqlValue>>> = table
            .rows
            .chunks(request.batch_size.max(1))
            .map(<[Vec<SqlValue>]>::to_vec)
            .collect();
        if chunks.is_empty() {
            // Column names still reach the consumer.
            chunks.push(Vec::new());
        }
        let delay = self.batch_delay;

        debug!(object = %name, batches = chunks.len(), "serving in-memory table");

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            for (i, rows) in chunks.into_iter().enumerate() {
                if fail_after == Some(i) {
                    let _ = tx
                        .send(Err(ExportError::source_read(&name, "connection lost mid-read")))
                        .await;
                    return;
                }
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                if tx.send(Ok(RowBatch::new(columns.clone(), rows))).await.is_err() {
                    return;
                }
            }
        });

        Ok(BatchStream::new(rx, table.ordered))
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}
