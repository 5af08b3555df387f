//! Operation logs and frozen histories.
//!
//! [`OpLog`] is the shared, append-only log that logging clerks write to
//! while a test runs. Timestamps come from a single monotonic clock owned by
//! the log, so `call` and `ret` values from different clients are directly
//! comparable. Once the workload is done the log is frozen into a
//! [`History`] and handed to the checker.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::node::ClientId;
use crate::operation::{KvInput, KvOutput, Operation, OperationId, Timestamp};

/// Unique identifier for a test run.
///
/// # Examples
///
/// ```
/// use kvlock_core::history::RunId;
///
/// let run_id = RunId::new();
/// assert_eq!(RunId::parse(&run_id.to_string()).unwrap(), run_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a new unique RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a RunId from its string form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata associated with a history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryMetadata {
    /// Human-readable name of the test.
    pub name: Option<String>,

    /// When the run started (Unix timestamp in milliseconds).
    pub started_at: u64,

    /// When the run ended (Unix timestamp in milliseconds).
    pub ended_at: Option<u64>,

    /// Number of clients in the test.
    pub num_clients: u32,

    /// Whether the network was reliable.
    pub reliable: bool,

    /// Additional key-value metadata.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl HistoryMetadata {
    /// Creates new metadata with the given start time.
    pub fn new(started_at: u64) -> Self {
        Self {
            started_at,
            ..Default::default()
        }
    }

    /// Sets the name of the test.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the end time.
    pub fn with_end_time(mut self, ended_at: u64) -> Self {
        self.ended_at = Some(ended_at);
        self
    }

    /// Sets the number of clients.
    pub fn with_num_clients(mut self, num_clients: u32) -> Self {
        self.num_clients = num_clients;
        self
    }

    /// Records whether the network was reliable.
    pub fn with_reliable(mut self, reliable: bool) -> Self {
        self.reliable = reliable;
        self
    }

    /// Adds extra metadata.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Returns the duration of the run in milliseconds, if ended.
    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at.map(|end| end.saturating_sub(self.started_at))
    }
}

/// A frozen history of completed operations.
///
/// # Type Parameters
///
/// * `I` - The operation input type.
/// * `O` - The operation output type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History<I = KvInput, O = KvOutput> {
    /// The run that produced this history.
    pub run_id: RunId,

    /// Operations in append order.
    pub operations: Vec<Operation<I, O>>,

    /// Metadata about the run.
    pub metadata: HistoryMetadata,
}

impl<I, O> History<I, O> {
    /// Creates an empty history for the given run.
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            operations: Vec::new(),
            metadata: HistoryMetadata::default(),
        }
    }

    /// Creates a history from existing operations.
    pub fn from_operations(operations: Vec<Operation<I, O>>) -> Self {
        Self {
            run_id: RunId::new(),
            operations,
            metadata: HistoryMetadata::default(),
        }
    }

    /// Returns the number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the history has no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns an iterator over the operations.
    pub fn iter(&self) -> impl Iterator<Item = &Operation<I, O>> {
        self.operations.iter()
    }

    /// Returns the set of clients that appear in the history.
    pub fn clients(&self) -> BTreeSet<ClientId> {
        self.operations.iter().map(|op| op.client).collect()
    }
}

/// Shared append-only log of completed operations.
///
/// Appends from concurrent clients are serialized by an internal mutex;
/// timestamps are read from the log's own monotonic clock.
#[derive(Debug)]
pub struct OpLog<I = KvInput, O = KvOutput> {
    start: Instant,
    next_id: AtomicU64,
    operations: Mutex<Vec<Operation<I, O>>>,
}

impl<I, O> OpLog<I, O> {
    /// Creates an empty log whose clock starts now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            next_id: AtomicU64::new(0),
            operations: Mutex::new(Vec::new()),
        }
    }

    /// Returns the current time on the log's monotonic clock.
    pub fn timestamp(&self) -> Timestamp {
        u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Appends a completed operation and returns its identifier.
    pub async fn append(
        &self,
        client: ClientId,
        input: I,
        output: O,
        call: Timestamp,
        ret: Timestamp,
    ) -> OperationId {
        let id = OperationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let op = Operation::new(id, client, input, output, call, ret);
        self.operations.lock().await.push(op);
        id
    }

    /// Returns the number of logged operations.
    pub async fn len(&self) -> usize {
        self.operations.lock().await.len()
    }

    /// Returns true if nothing has been logged.
    pub async fn is_empty(&self) -> bool {
        self.operations.lock().await.is_empty()
    }

    /// Discards every logged operation.
    pub async fn clear(&self) {
        self.operations.lock().await.clear();
    }
}

impl<I: Clone, O: Clone> OpLog<I, O> {
    /// Returns a copy of the logged operations.
    pub async fn read(&self) -> Vec<Operation<I, O>> {
        self.operations.lock().await.clone()
    }

    /// Freezes the current contents into a history.
    pub async fn freeze(&self, metadata: HistoryMetadata) -> History<I, O> {
        History {
            run_id: RunId::new(),
            operations: self.read().await,
            metadata,
        }
    }
}

impl<I, O> Default for OpLog<I, O> {
    fn default() -> Self {
        Self::new()
    }
}
