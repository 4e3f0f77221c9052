//! Source reader abstraction.
//!
//! - [`SourceReader`]: opens a streaming read of one object
//! - [`BatchStream`]: the bounded, single-pass batch sequence it returns

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

use super::identifier::ResolvedObject;
use super::value::RowBatch;

/// Parameters for reading one object.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// Fully qualified object to read.
    pub object: ResolvedObject,
    /// Predicate evaluated by the source (passed through verbatim).
    pub filter: Option<String>,
    /// Maximum rows per batch.
    pub batch_size: usize,
}

impl ReadRequest {
    pub fn new(object: ResolvedObject, filter: Option<String>, batch_size: usize) -> Self {
        Self {
            object,
            filter,
            batch_size,
        }
    }
}

/// Finite, single-pass sequence of row batches for one object.
///
/// Batches arrive through a bounded channel fed by a background task, so at
/// most a couple of batches are buffered at any time. Dropping the stream
/// stops the producer at its next send.
pub struct BatchStream {
    rx: mpsc::Receiver<Result<RowBatch>>,
    ordered: bool,
    columns: Option<Vec<String>>,
}

impl BatchStream {
    /// Wrap a batch receiver.
    ///
    /// `ordered` records whether batch boundaries are stable across runs
    /// (the source was read in key order).
    pub fn new(rx: mpsc::Receiver<Result<RowBatch>>, ordered: bool) -> Self {
        Self {
            rx,
            ordered,
            columns: None,
        }
    }

    /// Next batch, `Ok(None)` once the source is exhausted.
    ///
    /// An error ends the sequence. Row-less batches only carry column names
    /// and are absorbed here; see [`columns`](Self::columns).
    pub async fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        loop {
            match self.rx.recv().await {
                Some(Ok(batch)) => {
                    if self.columns.is_none() {
                        self.columns = Some(batch.columns.clone());
                    }
                    if !batch.is_empty() {
                        return Ok(Some(batch));
                    }
                }
                Some(Err(e)) => {
                    self.rx.close();
                    return Err(e);
                }
                None => return Ok(None),
            }
        }
    }

    /// Column names reported by the source, once any batch has arrived.
    ///
    /// Set even when the object returned no rows.
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Whether rows are read in a deterministic order.
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }
}

/// Read data from a source database.
///
/// # Streaming
///
/// [`open`](SourceReader::open) returns a [`BatchStream`] backed by a channel,
/// giving backpressure and memory-bounded reads of large objects. Every batch
/// holds at most `batch_size` rows and only the last may be shorter. A source
/// that returns no rows sends a single row-less batch carrying its column
/// names instead.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Start reading an object.
    ///
    /// Fails with `SourceRead` if the object cannot be queried. Errors after
    /// the first batch surface through [`BatchStream::next_batch`].
    async fn open(&self, request: ReadRequest) -> Result<BatchStream>;

    /// Verify the source is reachable.
    async fn test_connection(&self) -> Result<()>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;

    /// Close all connections.
    async fn close(&self);
}
