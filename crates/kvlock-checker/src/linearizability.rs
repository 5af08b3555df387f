//! Linearizability checker using the Wing-Gong-Lowe (WGL) algorithm.
//!
//! # Algorithm Overview
//!
//! 1. Partition the history with [`Model::partition`]. Each part is checked
//!    on its own (P-compositionality), optionally in parallel.
//! 2. Turn every operation into a call and a return event, sorted by time
//!    with calls first on ties, and thread them on a doubly linked list.
//! 3. Walk the list. At a call, try to linearize the operation: if the model
//!    accepts it and the resulting (linearized set, state) pair was not seen
//!    before, unlink the call and its return and restart from the head. At a
//!    return whose call is still pending, undo the most recent step.
//! 4. An empty list means every operation was linearized. Having to undo
//!    with nothing on the stack means no linearization exists.
//!
//! # Complexity
//!
//! Linearizability checking is NP-complete in general. The memo cache keeps
//! typical histories fast, and a deadline turns pathological ones into an
//! [`CheckStatus::Unknown`](crate::CheckStatus::Unknown) verdict.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kvlock_core::{History, Operation};
use tracing::{debug, warn};

use crate::result::{CheckResult, CheckStats, Counterexample, CounterexampleOp};
use crate::traits::Model;

/// How often, in loop iterations, the search looks at the clock.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Configuration for the linearizability checker.
#[derive(Debug, Clone)]
pub struct LinearizabilityConfig {
    /// Maximum time to spend checking (None for no timeout).
    pub timeout: Option<Duration>,
    /// Whether to search partitions in parallel.
    pub parallel: bool,
    /// Maximum number of states to explore per partition before giving up.
    pub max_states: Option<u64>,
}

impl Default for LinearizabilityConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(1)),
            parallel: true,
            max_states: Some(10_000_000),
        }
    }
}

impl LinearizabilityConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable or disable parallel search.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set maximum states to explore.
    pub fn with_max_states(mut self, max_states: u64) -> Self {
        self.max_states = Some(max_states);
        self
    }
}

/// A linearizability checker for histories of model `M`.
///
/// # Example
///
/// ```
/// use kvlock_checker::{KvModel, LinearizabilityChecker};
/// use kvlock_core::{ClientId, History, KvInput, KvOutput, Operation, OperationId};
///
/// let history = History::from_operations(vec![Operation::new(
///     OperationId(0),
///     ClientId(0),
///     KvInput::put("x", "v", 0),
///     KvOutput::Put(Ok(())),
///     0,
///     10,
/// )]);
///
/// let result = LinearizabilityChecker::new(KvModel).check_blocking(&history);
/// assert!(result.is_legal());
/// ```
#[derive(Debug, Clone)]
pub struct LinearizabilityChecker<M: Model> {
    model: M,
    config: LinearizabilityConfig,
}

impl<M: Model> LinearizabilityChecker<M> {
    /// Create a new linearizability checker.
    pub fn new(model: M) -> Self {
        Self::with_config(model, LinearizabilityConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(model: M, config: LinearizabilityConfig) -> Self {
        Self { model, config }
    }

    /// Set the timeout for checking.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// The checker configuration.
    pub fn config(&self) -> &LinearizabilityConfig {
        &self.config
    }

    /// Checks a history, searching partitions on the blocking thread pool
    /// when parallel search is enabled.
    pub async fn check(&self, history: &History<M::Input, M::Output>) -> CheckResult {
        if !self.config.parallel {
            return self.check_blocking(history);
        }
        if let Some(result) = reject_reversed(history) {
            return result;
        }

        let start = Instant::now();
        let limits = self.limits(start);
        let stats = Arc::new(SearchStats::default());
        let partitions = self.model.partition(&history.operations);

        let mut handles = Vec::with_capacity(partitions.len());
        for (index, part) in partitions.iter().enumerate() {
            let ops = collect_partition(&history.operations, part);
            let model = self.model.clone();
            let limits = limits.clone();
            let stats = stats.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let outcome = search_partition(&model, &ops, &limits, &stats);
                if matches!(outcome, Outcome::Illegal { .. }) {
                    limits.cancelled.store(true, Ordering::Relaxed);
                }
                (index, ops, outcome)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(error = %e, "partition search task failed");
                    results.push((
                        usize::MAX,
                        Vec::new(),
                        Outcome::Unknown(format!("search task failed: {}", e)),
                    ));
                }
            }
        }

        self.finish(history, partitions.len(), results, &stats, start)
    }

    /// Checks a history on the calling thread, one partition at a time.
    pub fn check_blocking(&self, history: &History<M::Input, M::Output>) -> CheckResult {
        if let Some(result) = reject_reversed(history) {
            return result;
        }

        let start = Instant::now();
        let limits = self.limits(start);
        let stats = SearchStats::default();
        let partitions = self.model.partition(&history.operations);

        let mut results = Vec::with_capacity(partitions.len());
        for (index, part) in partitions.iter().enumerate() {
            let ops = collect_partition(&history.operations, part);
            let outcome = search_partition(&self.model, &ops, &limits, &stats);
            let illegal = matches!(outcome, Outcome::Illegal { .. });
            results.push((index, ops, outcome));
            if illegal {
                break;
            }
        }

        self.finish(history, partitions.len(), results, &stats, start)
    }

    fn limits(&self, start: Instant) -> Limits {
        Limits {
            deadline: self.config.timeout.map(|t| start + t),
            max_states: self.config.max_states,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn finish(
        &self,
        history: &History<M::Input, M::Output>,
        num_partitions: usize,
        results: Vec<(usize, Vec<Operation<M::Input, M::Output>>, Outcome)>,
        stats: &SearchStats,
        start: Instant,
    ) -> CheckResult {
        let check_stats = CheckStats {
            num_operations: history.len(),
            num_partitions,
            states_explored: stats.states_explored.load(Ordering::Relaxed),
            backtracks: stats.backtracks.load(Ordering::Relaxed),
            max_depth: stats.max_depth.load(Ordering::Relaxed) as usize,
        };

        let mut unknown = None;
        let mut diagnostics = Vec::new();
        for (index, ops, outcome) in results {
            match outcome {
                Outcome::Illegal { prefix } => {
                    let ce = self.build_counterexample(index, &ops, &prefix);
                    debug!(
                        model = self.model.name(),
                        partition = index,
                        linearized = ce.linearized.len(),
                        remaining = ce.unlinearized.len(),
                        "history is not linearizable"
                    );
                    return CheckResult::illegal(ce)
                        .with_duration(start.elapsed())
                        .with_stats(check_stats);
                }
                Outcome::Unknown(reason) => {
                    diagnostics.push(format!("partition {}: {}", index, reason));
                    unknown.get_or_insert(reason);
                }
                Outcome::Legal | Outcome::Cancelled => {}
            }
        }

        let result = match unknown {
            Some(reason) => diagnostics
                .into_iter()
                .fold(CheckResult::unknown(reason), CheckResult::with_diagnostic),
            None => CheckResult::legal(),
        };
        debug!(
            model = self.model.name(),
            operations = check_stats.num_operations,
            partitions = num_partitions,
            states = check_stats.states_explored,
            "check finished"
        );
        result.with_duration(start.elapsed()).with_stats(check_stats)
    }

    /// Build a counterexample from a failed partition search.
    fn build_counterexample(
        &self,
        partition: usize,
        ops: &[Operation<M::Input, M::Output>],
        prefix: &[usize],
    ) -> Counterexample {
        let describe = |op: &Operation<M::Input, M::Output>| CounterexampleOp {
            id: op.id,
            client: op.client,
            description: self.model.describe_operation(&op.input, &op.output),
            interval: (op.call, op.ret),
        };

        let in_prefix: HashSet<usize> = prefix.iter().copied().collect();
        let linearized = prefix.iter().map(|&i| describe(&ops[i])).collect();
        let mut unlinearized: Vec<CounterexampleOp> = (0..ops.len())
            .filter(|i| !in_prefix.contains(i))
            .map(|i| describe(&ops[i]))
            .collect();
        unlinearized.sort_by_key(|op| op.interval);

        Counterexample {
            description: format!(
                "Linearized {} of {} operations before getting stuck",
                prefix.len(),
                ops.len()
            ),
            partition,
            linearized,
            unlinearized,
        }
    }
}

/// Returns an unknown verdict if some operation returns before its call.
fn reject_reversed<I, O>(history: &History<I, O>) -> Option<CheckResult> {
    let reversed: Vec<String> = history
        .operations
        .iter()
        .filter(|op| op.ret < op.call)
        .map(|op| format!("{} returns at {} before its call at {}", op.id, op.ret, op.call))
        .collect();
    if reversed.is_empty() {
        return None;
    }
    warn!(operations = reversed.len(), "history has reversed intervals");
    Some(
        reversed.into_iter().fold(
            CheckResult::unknown("operation returns before its call"),
            CheckResult::with_diagnostic,
        ),
    )
}

fn collect_partition<I: Clone, O: Clone>(
    operations: &[Operation<I, O>],
    indices: &[usize],
) -> Vec<Operation<I, O>> {
    indices
        .iter()
        .filter_map(|&i| operations.get(i).cloned())
        .collect()
}

/// Search limits shared by every partition of one check.
#[derive(Debug, Clone)]
struct Limits {
    deadline: Option<Instant>,
    max_states: Option<u64>,
    cancelled: Arc<AtomicBool>,
}

/// Atomic statistics for search progress.
#[derive(Debug, Default)]
struct SearchStats {
    states_explored: AtomicU64,
    backtracks: AtomicU64,
    max_depth: AtomicU64,
}

/// Result of searching one partition.
#[derive(Debug)]
enum Outcome {
    Legal,
    /// Indices of the longest linearized prefix, in linearization order.
    Illegal { prefix: Vec<usize> },
    Unknown(String),
    Cancelled,
}

/// Fixed-size set of operation indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Bitset(Vec<u64>);

impl Bitset {
    fn new(bits: usize) -> Self {
        Self(vec![0; (bits + 63) / 64])
    }

    fn set(&mut self, i: usize) {
        self.0[i / 64] |= 1u64 << (i % 64);
    }

    fn clear(&mut self, i: usize) {
        self.0[i / 64] &= !(1u64 << (i % 64));
    }
}

const NIL: usize = usize::MAX;
const HEAD: usize = 0;

#[derive(Debug, Clone)]
struct Node {
    prev: usize,
    next: usize,
    /// Index of the operation in its partition.
    op: usize,
    is_call: bool,
    /// For a call, the index of its return node.
    matching: usize,
}

/// Call and return events threaded on a list with a head sentinel.
///
/// Lifting unlinks a call and its return; unlifting relinks them. Unlifts
/// must happen in reverse order of lifts.
struct EventList {
    nodes: Vec<Node>,
}

impl EventList {
    /// Builds the list, or returns the index of an operation whose return
    /// sorts before its call.
    fn build<I, O>(ops: &[Operation<I, O>]) -> Result<Self, usize> {
        // (time, is_return, op)
        let mut events: Vec<(u64, bool, usize)> = Vec::with_capacity(ops.len() * 2);
        for (i, op) in ops.iter().enumerate() {
            events.push((op.call, false, i));
            events.push((op.ret, true, i));
        }
        events.sort();

        let mut nodes = Vec::with_capacity(events.len() + 1);
        nodes.push(Node {
            prev: NIL,
            next: NIL,
            op: NIL,
            is_call: false,
            matching: NIL,
        });

        let mut call_node = vec![NIL; ops.len()];
        for (pos, &(_, is_return, op)) in events.iter().enumerate() {
            let index = pos + 1;
            nodes.push(Node {
                prev: index - 1,
                next: if pos + 1 < events.len() { index + 1 } else { NIL },
                op,
                is_call: !is_return,
                matching: NIL,
            });
            if is_return {
                let call = call_node[op];
                if call == NIL {
                    return Err(op);
                }
                nodes[call].matching = index;
            } else {
                call_node[op] = index;
            }
        }
        if !events.is_empty() {
            nodes[HEAD].next = 1;
        }

        Ok(Self { nodes })
    }

    fn first(&self) -> usize {
        self.nodes[HEAD].next
    }

    fn is_empty(&self) -> bool {
        self.nodes[HEAD].next == NIL
    }

    fn unlink(&mut self, n: usize) {
        let Node { prev, next, .. } = self.nodes[n];
        self.nodes[prev].next = next;
        if next != NIL {
            self.nodes[next].prev = prev;
        }
    }

    fn relink(&mut self, n: usize) {
        let Node { prev, next, .. } = self.nodes[n];
        self.nodes[prev].next = n;
        if next != NIL {
            self.nodes[next].prev = n;
        }
    }

    fn lift(&mut self, call: usize) {
        let ret = self.nodes[call].matching;
        self.unlink(call);
        self.unlink(ret);
    }

    fn unlift(&mut self, call: usize) {
        let ret = self.nodes[call].matching;
        self.relink(ret);
        self.relink(call);
    }
}

/// Runs the WGL search over the operations of one partition.
fn search_partition<M: Model>(
    model: &M,
    ops: &[Operation<M::Input, M::Output>],
    limits: &Limits,
    stats: &SearchStats,
) -> Outcome {
    let mut list = match EventList::build(ops) {
        Ok(list) => list,
        Err(op) => {
            return Outcome::Unknown(format!("{} returns before its call", ops[op].id));
        }
    };
    let mut state = model.init();
    let mut linearized = Bitset::new(ops.len());
    let mut cache: HashSet<(Bitset, M::State)> = HashSet::new();
    let mut calls: Vec<(usize, M::State)> = Vec::new();
    let mut longest: Vec<usize> = Vec::new();
    let mut iterations = 0u64;
    let mut explored = 0u64;

    let mut entry = list.first();
    while !list.is_empty() {
        if iterations % DEADLINE_CHECK_INTERVAL == 0 {
            if limits.cancelled.load(Ordering::Relaxed) {
                return Outcome::Cancelled;
            }
            if limits.deadline.is_some_and(|d| Instant::now() >= d) {
                return Outcome::Unknown("search timed out".into());
            }
        }
        iterations += 1;

        let node = list.nodes[entry].clone();
        if node.is_call {
            let op = &ops[node.op];
            if let Some(next_state) = model.step(&state, &op.input, &op.output) {
                let mut key = linearized.clone();
                key.set(node.op);
                if cache.insert((key, next_state.clone())) {
                    explored += 1;
                    stats.states_explored.fetch_add(1, Ordering::Relaxed);
                    if limits.max_states.is_some_and(|max| explored >= max) {
                        return Outcome::Unknown("maximum states reached".into());
                    }

                    calls.push((entry, std::mem::replace(&mut state, next_state)));
                    linearized.set(node.op);
                    list.lift(entry);
                    if calls.len() > longest.len() {
                        longest = calls.iter().map(|&(n, _)| list.nodes[n].op).collect();
                        stats
                            .max_depth
                            .fetch_max(longest.len() as u64, Ordering::Relaxed);
                    }
                    entry = list.first();
                    continue;
                }
            }
            entry = node.next;
        } else {
            let Some((call, previous)) = calls.pop() else {
                return Outcome::Illegal { prefix: longest };
            };
            stats.backtracks.fetch_add(1, Ordering::Relaxed);
            state = previous;
            linearized.clear(list.nodes[call].op);
            list.unlift(call);
            entry = list.nodes[call].next;
        }
    }

    Outcome::Legal
}
