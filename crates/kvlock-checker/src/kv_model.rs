//! Sequential model of the versioned key-value store.

use std::collections::BTreeMap;

use kvlock_core::{KvError, KvInput, KvOutput, Operation, VersionedValue};

use crate::traits::Model;

/// Model of one key of the versioned store.
///
/// Histories are partitioned by key, so the state is what a single key
/// holds: `None` before its first put, then the current value and version.
///
/// A put whose version matches must report `OK` or `ErrMaybe` and takes
/// effect. A put whose version does not match must report `ErrNoKey` (key
/// absent), `ErrVersion` (key present) or `ErrMaybe`, and changes nothing.
/// `ErrMaybe` is thus accepted on both paths: the search decides whether
/// the ambiguous put applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct KvModel;

impl KvModel {
    /// Creates the model.
    pub fn new() -> Self {
        Self
    }
}

impl Model for KvModel {
    type Input = KvInput;
    type Output = KvOutput;
    type State = Option<VersionedValue>;

    fn name(&self) -> &str {
        "kv"
    }

    fn init(&self) -> Self::State {
        None
    }

    fn step(
        &self,
        state: &Self::State,
        input: &Self::Input,
        output: &Self::Output,
    ) -> Option<Self::State> {
        match (input, output) {
            (KvInput::Get { .. }, KvOutput::Get(observed)) => {
                let legal = match (state, observed) {
                    (None, Err(KvError::NoKey)) => true,
                    (Some(stored), Ok(seen)) => stored == seen,
                    _ => false,
                };
                legal.then(|| state.clone())
            }
            (KvInput::Put { value, version, .. }, KvOutput::Put(observed)) => {
                let stored = state.as_ref().map(|v| v.version);
                let applies = match stored {
                    None => *version == 0,
                    Some(current) => current == *version,
                };

                if applies {
                    match observed {
                        Ok(()) | Err(KvError::Maybe) => {
                            Some(Some(VersionedValue::new(value.clone(), version + 1)))
                        }
                        Err(_) => None,
                    }
                } else {
                    let legal = match (stored, observed) {
                        (_, Err(KvError::Maybe)) => true,
                        (None, Err(KvError::NoKey)) => true,
                        (Some(_), Err(KvError::Version)) => true,
                        _ => false,
                    };
                    legal.then(|| state.clone())
                }
            }
            _ => None,
        }
    }

    fn partition(&self, operations: &[Operation<KvInput, KvOutput>]) -> Vec<Vec<usize>> {
        let mut by_key: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, op) in operations.iter().enumerate() {
            by_key.entry(op.input.key()).or_default().push(i);
        }
        by_key.into_values().collect()
    }

    fn describe_operation(&self, input: &KvInput, output: &KvOutput) -> String {
        format!("{} -> {}", input, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(value: &str, version: u64) -> KvInput {
        KvInput::put("k", value, version)
    }

    #[test]
    fn test_get_must_match_state() {
        let m = KvModel;
        let get = KvInput::get("k");
        assert_eq!(m.step(&None, &get, &KvOutput::Get(Err(KvError::NoKey))), Some(None));
        assert_eq!(
            m.step(&None, &get, &KvOutput::Get(Ok(VersionedValue::new("", 1)))),
            None
        );

        let state = Some(VersionedValue::new("a", 2));
        assert!(m
            .step(&state, &get, &KvOutput::Get(Ok(VersionedValue::new("a", 2))))
            .is_some());
        assert!(m
            .step(&state, &get, &KvOutput::Get(Ok(VersionedValue::new("a", 1))))
            .is_none());
        assert!(m.step(&state, &get, &KvOutput::Get(Err(KvError::NoKey))).is_none());
    }

    #[test]
    fn test_matching_put_applies() {
        let m = KvModel;
        assert_eq!(
            m.step(&None, &put("a", 0), &KvOutput::Put(Ok(()))),
            Some(Some(VersionedValue::new("a", 1)))
        );
        assert_eq!(
            m.step(&None, &put("a", 0), &KvOutput::Put(Err(KvError::Maybe))),
            Some(Some(VersionedValue::new("a", 1)))
        );
        assert_eq!(m.step(&None, &put("a", 0), &KvOutput::Put(Err(KvError::Version))), None);

        let state = Some(VersionedValue::new("a", 1));
        assert_eq!(
            m.step(&state, &put("b", 1), &KvOutput::Put(Ok(()))),
            Some(Some(VersionedValue::new("b", 2)))
        );
    }

    #[test]
    fn test_mismatched_put_is_rejected() {
        let m = KvModel;
        assert_eq!(
            m.step(&None, &put("a", 3), &KvOutput::Put(Err(KvError::NoKey))),
            Some(None)
        );
        assert_eq!(m.step(&None, &put("a", 3), &KvOutput::Put(Ok(()))), None);
        assert_eq!(m.step(&None, &put("a", 3), &KvOutput::Put(Err(KvError::Version))), None);

        let state = Some(VersionedValue::new("a", 2));
        assert_eq!(
            m.step(&state, &put("b", 0), &KvOutput::Put(Err(KvError::Version))),
            Some(state.clone())
        );
        assert_eq!(
            m.step(&state, &put("b", 5), &KvOutput::Put(Err(KvError::Maybe))),
            Some(state.clone())
        );
        assert_eq!(m.step(&state, &put("b", 5), &KvOutput::Put(Err(KvError::NoKey))), None);
    }

    #[test]
    fn test_mismatched_output_kind() {
        let m = KvModel;
        assert_eq!(m.step(&None, &KvInput::get("k"), &KvOutput::Put(Ok(()))), None);
    }

    #[test]
    fn test_partition_by_key() {
        use kvlock_core::{ClientId, OperationId};
        let op = |i: u64, key: &str| {
            Operation::new(
                OperationId(i),
                ClientId(0),
                KvInput::get(key),
                KvOutput::Get(Err(KvError::NoKey)),
                i,
                i,
            )
        };
        let ops = vec![op(0, "a"), op(1, "b"), op(2, "a")];
        assert_eq!(KvModel.partition(&ops), vec![vec![0, 2], vec![1]]);
    }
}
