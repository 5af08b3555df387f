use std::collections::HashMap;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use kvlock_checker::{KvModel, LinearizabilityChecker, LinearizabilityConfig};
use kvlock_core::{
    ClientId, History, KvError, KvInput, KvOutput, Operation, OperationId, VersionedValue,
};

/// Generates a legal history with overlapping intervals.
///
/// Operations take effect in index order at `10 * i + 1`, but each interval
/// spans 25 ticks, so neighbouring operations overlap.
fn generate_history(num_ops: usize, num_keys: usize, seed: u64) -> History {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut store: HashMap<String, VersionedValue> = HashMap::new();
    let mut ops = Vec::with_capacity(num_ops);

    for i in 0..num_ops {
        let key = format!("k{}", rng.gen_range(0..num_keys));
        let current = store.get(&key).cloned();
        let (input, output) = if rng.gen_bool(0.5) {
            let output = current.clone().ok_or(KvError::NoKey);
            (KvInput::get(key), KvOutput::Get(output))
        } else {
            let stored = current.as_ref().map_or(0, |v| v.version);
            // Mostly matching versions, some stale.
            let version = if rng.gen_bool(0.8) { stored } else { stored + 1 };
            let value = format!("v{}", i);
            let output = match current {
                None if version == 0 => Ok(()),
                None => Err(KvError::NoKey),
                Some(v) if v.version == version => Ok(()),
                Some(_) => Err(KvError::Version),
            };
            if output.is_ok() {
                store.insert(key.clone(), VersionedValue::new(value.clone(), version + 1));
            }
            (KvInput::put(key, value, version), KvOutput::Put(output))
        };

        let call = 10 * i as u64;
        ops.push(Operation::new(
            OperationId(i as u64),
            ClientId((i % 4) as u32),
            input,
            output,
            call,
            call + 25,
        ));
    }

    History::from_operations(ops)
}

fn bench_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("linearizability");
    let config = LinearizabilityConfig::new()
        .with_parallel(false)
        .with_timeout(Duration::from_secs(10));
    let checker = LinearizabilityChecker::with_config(KvModel, config);

    for &num_ops in &[100usize, 1_000, 5_000] {
        let history = generate_history(num_ops, 4, 7);
        group.bench_with_input(BenchmarkId::new("kv", num_ops), &history, |b, h| {
            b.iter(|| {
                let result = checker.check_blocking(black_box(h));
                assert!(result.is_legal());
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_check);
criterion_main!(benches);
