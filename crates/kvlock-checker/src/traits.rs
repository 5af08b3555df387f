//! Sequential models of checked objects.

use std::fmt::Debug;
use std::hash::Hash;

use kvlock_core::Operation;

/// A sequential model of an object.
///
/// The checker explores orders of the recorded operations and feeds each
/// candidate through [`Model::step`]. A history is linearizable if some
/// order consistent with real time is accepted step by step.
///
/// # Example
///
/// ```
/// use kvlock_checker::Model;
///
/// #[derive(Clone)]
/// struct Counter;
///
/// impl Model for Counter {
///     type Input = ();
///     type Output = u64;
///     type State = u64;
///
///     fn name(&self) -> &str {
///         "counter"
///     }
///
///     fn init(&self) -> u64 {
///         0
///     }
///
///     // An increment is accepted if it observed the next value.
///     fn step(&self, state: &u64, _: &(), output: &u64) -> Option<u64> {
///         (*output == state + 1).then_some(*output)
///     }
/// }
///
/// assert_eq!(Counter.step(&0, &(), &1), Some(1));
/// assert_eq!(Counter.step(&0, &(), &2), None);
/// ```
pub trait Model: Clone + Send + Sync + 'static {
    /// What a client asked for.
    type Input: Clone + Debug + Send + Sync + 'static;

    /// What a client observed.
    type Output: Clone + Debug + Send + Sync + 'static;

    /// State of the object. Used as a memo key, so it must hash.
    type State: Clone + Eq + Hash + Debug + Send + 'static;

    /// Name of the model for logs and reports.
    fn name(&self) -> &str;

    /// The state before any operation.
    fn init(&self) -> Self::State;

    /// Applies one operation.
    ///
    /// Returns the next state if `output` is a legal result of applying
    /// `input` in `state`, or `None` if it is not.
    fn step(
        &self,
        state: &Self::State,
        input: &Self::Input,
        output: &Self::Output,
    ) -> Option<Self::State>;

    /// Splits a history into independently checkable parts.
    ///
    /// Each part is a list of indices into `operations`. The default keeps
    /// the whole history together.
    fn partition(&self, operations: &[Operation<Self::Input, Self::Output>]) -> Vec<Vec<usize>> {
        vec![(0..operations.len()).collect()]
    }

    /// Renders one operation for counterexamples.
    fn describe_operation(&self, input: &Self::Input, output: &Self::Output) -> String {
        format!("{:?} -> {:?}", input, output)
    }
}
