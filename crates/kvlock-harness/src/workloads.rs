//! Client workloads and the checks run over their results.
//!
//! Put workloads race clients on versioned puts and compare the final
//! version with what the clients counted. Lock workloads run critical
//! sections that would expose a second holder and count increments of a
//! shared counter.

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use kvlock_client::KvClerk;
use kvlock_core::{ClientId, Key, KvError, KvResult, Version};
use kvlock_lock::{LockConfig, Locker, NaiveLock, RobustLock};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::stop::StopSignal;
use crate::test_kv::{ClientResult, TestKv};

/// Key the lock lives under.
pub const LOCK_KEY: &str = "l";

/// Key written only from inside the critical section.
pub const SHARED_KEY: &str = "l0";

/// Counter incremented once per critical section.
pub const COUNTER_KEY: &str = "count";

/// Key the put workload races on.
pub const PUT_KEY: &str = "k";

/// Time spent holding the shared key inside the critical section.
pub const CRITICAL_SECTION: Duration = Duration::from_millis(10);

/// Value written by the put workload: who wrote it and at which version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryV {
    pub id: u32,
    pub v: Version,
}

/// Serializes `value` as JSON and puts it.
pub async fn put_json<C, T>(ck: &C, key: &str, value: &T, version: Version) -> Result<KvResult<()>>
where
    C: KvClerk + ?Sized,
    T: Serialize + ?Sized,
{
    let encoded = serde_json::to_string(value)?;
    Ok(ck.put(key, &encoded, version).await)
}

/// Gets `key` and decodes its value as JSON. The key must exist.
pub async fn get_json<C, T>(ck: &C, client: ClientId, key: &str) -> Result<(T, Version)>
where
    C: KvClerk + ?Sized,
    T: DeserializeOwned,
{
    match ck.get(key).await {
        Ok(v) => Ok((serde_json::from_str(&v.value)?, v.version)),
        Err(code) => Err(HarnessError::unexpected(client, format!("get {key:?}"), code)),
    }
}

/// Puts until one put by `client` went through while others race on `key`.
///
/// Returns the version the key was at afterwards and whether the put is
/// known to have applied (`OK`) rather than ambiguous (`ErrMaybe`).
pub async fn one_put<C>(
    client: ClientId,
    ck: &C,
    key: &str,
    mut version: Version,
) -> Result<(Version, bool)>
where
    C: KvClerk + ?Sized,
{
    loop {
        let entry = EntryV {
            id: client.0,
            v: version,
        };
        let result = put_json(ck, key, &entry, version).await?;
        match result {
            Ok(()) | Err(KvError::Version) | Err(KvError::Maybe) => {}
            Err(code) => return Err(HarnessError::unexpected(client, format!("put {key:?}"), code)),
        }

        let (stored, current): (EntryV, Version) = get_json(ck, client, key).await?;
        if result.is_ok() && current == version + 1 && stored != entry {
            return Err(HarnessError::WrongValue {
                client,
                message: format!("expected {:?} at version {}, found {:?}", entry, current, stored),
            });
        }
        version = current;

        match result {
            Ok(()) => return Ok((version, true)),
            Err(KvError::Maybe) => return Ok((version, false)),
            _ => debug!(%client, key, version, "lost put race"),
        }
    }
}

/// One of many clients doing [`one_put`]s until stopped.
///
/// With `random_keys` each put picks a key from `keys`; otherwise every
/// put goes to the first key.
pub async fn one_client_put<C>(
    client: ClientId,
    ck: &C,
    keys: &[Key],
    random_keys: bool,
    stop: &StopSignal,
) -> Result<ClientResult>
where
    C: KvClerk + ?Sized,
{
    let mut versions = vec![0; keys.len()];
    let mut res = ClientResult::default();
    if keys.is_empty() {
        return Ok(res);
    }

    while !stop.is_stopped() {
        let i = if random_keys {
            rand::thread_rng().gen_range(0..keys.len())
        } else {
            0
        };
        let (version, ok) = one_put(client, ck, &keys[i], versions[i]).await?;
        versions[i] = version;
        if ok {
            res.ok += 1;
        } else {
            res.maybe += 1;
        }
    }
    Ok(res)
}

/// Checks the final version of `key` against the clients' counts.
///
/// On a reliable network every counted put applied exactly once, so the
/// version equals the `OK` count. On an unreliable one ambiguous puts may
/// or may not have applied, so the version is at most `ok + maybe`.
pub async fn check_put_concurrent<C>(
    ck: &C,
    client: ClientId,
    key: &str,
    results: &[ClientResult],
    reliable: bool,
) -> Result<ClientResult>
where
    C: KvClerk + ?Sized,
{
    let (_, version): (EntryV, Version) = get_json(ck, client, key).await?;
    let total = ClientResult::total(results);

    let consistent = if reliable {
        version == total.ok
    } else {
        version <= total.ok + total.maybe
    };
    if !consistent {
        return Err(HarnessError::WrongPutCount {
            key: key.to_string(),
            version,
            ok: total.ok,
            maybe: total.maybe,
        });
    }
    Ok(total)
}

/// Which lock implementation a workload uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    Naive,
    Robust,
}

impl LockKind {
    /// Creates a lock of this kind on `key`.
    pub fn make_lock<C>(self, clerk: C, key: &str, config: LockConfig) -> Box<dyn Locker>
    where
        C: KvClerk + 'static,
    {
        match self {
            LockKind::Naive => Box::new(NaiveLock::new(clerk, key).with_config(config)),
            LockKind::Robust => Box::new(RobustLock::new(clerk, key).with_config(config)),
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Naive => write!(f, "naive"),
            LockKind::Robust => write!(f, "robust"),
        }
    }
}

impl FromStr for LockKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "naive" => Ok(LockKind::Naive),
            "robust" => Ok(LockKind::Robust),
            other => Err(format!("unknown lock kind: {other} (expected naive or robust)")),
        }
    }
}

fn expect_applied(client: ClientId, operation: &str, result: KvResult<()>) -> Result<()> {
    match result {
        Err(code) if code.is_definitive() => Err(HarnessError::unexpected(client, operation, code)),
        _ => Ok(()),
    }
}

/// One lock client: runs critical sections until stopped.
///
/// Inside each section the client checks that [`SHARED_KEY`] is empty,
/// writes its id there, increments [`COUNTER_KEY`], and empties the
/// shared key again. Puts made while holding the lock have no competing
/// writer, so an `ErrMaybe` among them means the put applied.
pub async fn one_lock_client<C>(
    client: ClientId,
    ck: &C,
    lock: &dyn Locker,
    stop: &StopSignal,
) -> Result<ClientResult>
where
    C: KvClerk + ?Sized,
{
    let _ = ck.put(SHARED_KEY, "", 0).await;

    let mut res = ClientResult::default();
    while !stop.is_stopped() {
        lock.acquire().await;

        let version = match ck.get(SHARED_KEY).await {
            Ok(v) if v.value.is_empty() => v.version,
            Ok(v) => {
                return Err(HarnessError::TwoHolders {
                    client,
                    key: lock.key().to_string(),
                    shared: SHARED_KEY.to_string(),
                    observed: v.value,
                })
            }
            Err(code) => return Err(HarnessError::unexpected(client, "get shared key", code)),
        };

        expect_applied(
            client,
            "put shared key",
            ck.put(SHARED_KEY, &client.0.to_string(), version).await,
        )?;
        increment(client, ck).await?;
        tokio::time::sleep(CRITICAL_SECTION).await;
        expect_applied(
            client,
            "reset shared key",
            ck.put(SHARED_KEY, "", version + 1).await,
        )?;

        lock.release().await?;
        res.ok += 1;
    }
    debug!(%client, sections = res.ok, "lock client stopped");
    Ok(res)
}

async fn increment<C>(client: ClientId, ck: &C) -> Result<()>
where
    C: KvClerk + ?Sized,
{
    let (count, version) = match ck.get(COUNTER_KEY).await {
        Ok(v) => (parse_count(client, &v.value)?, v.version),
        Err(KvError::NoKey) => (0, 0),
        Err(code) => return Err(HarnessError::unexpected(client, "get counter", code)),
    };
    expect_applied(
        client,
        "put counter",
        ck.put(COUNTER_KEY, &(count + 1).to_string(), version).await,
    )
}

fn parse_count(client: ClientId, value: &str) -> Result<u64> {
    value.parse().map_err(|_| HarnessError::WrongValue {
        client,
        message: format!("counter holds {value:?}"),
    })
}

/// Checks that the counter was incremented exactly once per section.
pub async fn check_increments<C>(ck: &C, client: ClientId, results: &[ClientResult]) -> Result<u64>
where
    C: KvClerk + ?Sized,
{
    let total = ClientResult::total(results);
    let (count, version) = match ck.get(COUNTER_KEY).await {
        Ok(v) => (parse_count(client, &v.value)?, v.version),
        Err(KvError::NoKey) => (0, 0),
        Err(code) => return Err(HarnessError::unexpected(client, "get counter", code)),
    };
    if count != total.ok || version != total.ok {
        return Err(HarnessError::WrongPutCount {
            key: COUNTER_KEY.to_string(),
            version,
            ok: total.ok,
            maybe: total.maybe,
        });
    }
    Ok(count)
}

fn network_label(reliable: bool) -> &'static str {
    if reliable {
        "reliable"
    } else {
        "unreliable"
    }
}

async fn finish<T>(ts: TestKv, outcome: Result<T>) -> Result<T> {
    let outcome = match outcome {
        Ok(value) => ts.end().await.map(|()| value),
        Err(err) => Err(err),
    };
    ts.cleanup(outcome.is_err()).await?;
    outcome
}

/// Runs `config.clients` lock clients and checks mutual exclusion, the
/// increment count and linearizability of the recorded history.
pub async fn run_lock_clients(config: &HarnessConfig, kind: LockKind) -> Result<ClientResult> {
    if kind == LockKind::Naive && !config.reliable {
        warn!("the naive lock can deadlock or double-release over an unreliable network");
    }

    let ts = TestKv::new(config.clone()).await;
    let outcome = lock_clients(&ts, config, kind).await;
    finish(ts, outcome).await
}

async fn lock_clients(ts: &TestKv, config: &HarnessConfig, kind: LockKind) -> Result<ClientResult> {
    let n = config.clients;
    ts.begin(format!(
        "Test: {} {} lock clients ({})",
        n,
        kind,
        network_label(config.reliable)
    ))
    .await;

    let lock_config = LockConfig::default().with_retry_interval(config.retry_interval());
    let results = ts
        .spawn_clients_and_wait(n, config.duration(), move |client, ck, stop| async move {
            let lock = kind.make_lock(Arc::clone(&ck), LOCK_KEY, lock_config);
            one_lock_client(client, &*ck, lock.as_ref(), &stop).await
        })
        .await?;

    let checker = ts.make_clerk(ClientId(n as u32)).await;
    let sections = check_increments(&*checker, checker.client(), &results).await?;
    ts.check_linearizable(config.linearizability_timeout()).await?;

    info!(sections, lock = %kind, "lock clients done");
    Ok(ClientResult::total(&results))
}

/// Runs `config.clients` clients racing puts on one key and checks the
/// final version and linearizability of the recorded history.
pub async fn run_put_clients(config: &HarnessConfig) -> Result<ClientResult> {
    let ts = TestKv::new(config.clone()).await;
    let outcome = put_clients(&ts, config).await;
    finish(ts, outcome).await
}

async fn put_clients(ts: &TestKv, config: &HarnessConfig) -> Result<ClientResult> {
    let n = config.clients;
    ts.begin(format!(
        "Test: {} clients put concurrently ({})",
        n,
        network_label(config.reliable)
    ))
    .await;

    let keys: Vec<Key> = vec![PUT_KEY.to_string()];
    let results = ts
        .spawn_clients_and_wait(n, config.duration(), move |client, ck, stop| {
            let keys = keys.clone();
            async move { one_client_put(client, &*ck, &keys, false, &stop).await }
        })
        .await?;

    let checker = ts.make_clerk(ClientId(n as u32)).await;
    let total =
        check_put_concurrent(&*checker, checker.client(), PUT_KEY, &results, config.reliable)
            .await?;
    ts.check_linearizable(config.linearizability_timeout()).await?;

    info!(ok = total.ok, maybe = total.maybe, "put clients done");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VisMode;
    use kvlock_core::VersionedValue;

    fn config(clients: usize, millis: u64, reliable: bool) -> HarnessConfig {
        let mut config = HarnessConfig::default()
            .with_clients(clients)
            .with_duration(Duration::from_millis(millis))
            .with_reliable(reliable);
        config.vis.mode = VisMode::Never;
        config
    }

    #[tokio::test]
    async fn test_scenario_versioned_puts() {
        let ts = TestKv::new(config(1, 0, true)).await;
        let ck = ts.make_clerk(ClientId(0)).await;

        assert_eq!(ck.put("x", "v", 0).await, Ok(()));
        assert_eq!(ck.get("x").await, Ok(VersionedValue::new("v", 1)));
        assert_eq!(ck.put("x", "v2", 1).await, Ok(()));
        assert_eq!(ck.get("x").await, Ok(VersionedValue::new("v2", 2)));
        assert_eq!(ck.put("x", "v3", 1).await, Err(KvError::Version));

        ts.check_linearizable(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_scenario_missing_key() {
        let ts = TestKv::new(config(1, 0, true)).await;
        let ck = ts.make_clerk(ClientId(0)).await;

        assert_eq!(ck.get("missing").await, Err(KvError::NoKey));
        assert_eq!(ck.put("missing", "w", 5).await, Err(KvError::NoKey));
        assert!(ts.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_versions_increase_by_one() {
        let ts = TestKv::new(config(1, 0, true)).await;
        let ck = ts.make_clerk(ClientId(0)).await;

        for expected in 0..20u64 {
            assert_eq!(ck.put("x", &expected.to_string(), expected).await, Ok(()));
            let v = ck.get("x").await.unwrap();
            assert_eq!(v.version, expected + 1);
        }
    }

    #[tokio::test]
    async fn test_one_put_single_client() {
        let ts = TestKv::new(config(1, 0, true)).await;
        let ck = ts.make_clerk(ClientId(4)).await;

        assert_eq!(one_put(ClientId(4), &*ck, PUT_KEY, 0).await.unwrap(), (1, true));
        // A stale version loses once, then catches up.
        assert_eq!(one_put(ClientId(4), &*ck, PUT_KEY, 0).await.unwrap(), (2, true));

        let (entry, version): (EntryV, Version) =
            get_json(&*ck, ClientId(4), PUT_KEY).await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(entry, EntryV { id: 4, v: 1 });
    }

    #[tokio::test]
    async fn test_put_concurrent_reliable() {
        let total = run_put_clients(&config(5, 500, true)).await.unwrap();
        assert!(total.ok > 0);
        // Without retries the clerk never reports ErrMaybe.
        assert_eq!(total.maybe, 0);
    }

    #[tokio::test]
    async fn test_put_concurrent_unreliable() {
        let total = run_put_clients(&config(5, 1000, false)).await.unwrap();
        assert!(total.ok + total.maybe > 0);
    }

    #[tokio::test]
    async fn test_put_count_mismatch_detected() {
        let ts = TestKv::new(config(1, 0, true)).await;
        let ck = ts.make_clerk(ClientId(0)).await;
        one_put(ClientId(0), &*ck, PUT_KEY, 0).await.unwrap();

        let claimed = [ClientResult { ok: 2, maybe: 0 }];
        let err = check_put_concurrent(&*ck, ClientId(0), PUT_KEY, &claimed, true)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::WrongPutCount { version: 1, ok: 2, .. }));

        // Unreliable runs only bound the version from above.
        let total = check_put_concurrent(&*ck, ClientId(0), PUT_KEY, &claimed, false)
            .await
            .unwrap();
        assert_eq!(total.ok, 2);
    }

    #[tokio::test]
    async fn test_one_client_naive_lock_reliable() {
        let total = run_lock_clients(&config(1, 300, true), LockKind::Naive)
            .await
            .unwrap();
        assert!(total.ok > 0);
    }

    #[tokio::test]
    async fn test_many_clients_naive_lock_reliable() {
        let total = run_lock_clients(&config(10, 1000, true), LockKind::Naive)
            .await
            .unwrap();
        assert!(total.ok > 0);
    }

    #[tokio::test]
    async fn test_many_clients_robust_lock_reliable() {
        let total = run_lock_clients(&config(10, 1000, true), LockKind::Robust)
            .await
            .unwrap();
        assert!(total.ok > 0);
    }

    #[tokio::test]
    async fn test_scenario_robust_lock_unreliable() {
        let total = run_lock_clients(&config(10, 2000, false), LockKind::Robust)
            .await
            .unwrap();
        assert!(total.ok > 0);
    }

    #[tokio::test]
    async fn test_second_holder_detected() {
        let ts = TestKv::new(config(1, 0, true)).await;
        ts.store().put(SHARED_KEY, "7", 0).await.unwrap();

        let err = ts
            .spawn_clients_and_wait(1, Duration::from_millis(200), |client, ck, stop| async move {
                let lock =
                    LockKind::Robust.make_lock(Arc::clone(&ck), LOCK_KEY, LockConfig::default());
                one_lock_client(client, &*ck, lock.as_ref(), &stop).await
            })
            .await
            .unwrap_err();

        match err {
            HarnessError::TwoHolders { observed, shared, .. } => {
                assert_eq!(observed, "7");
                assert_eq!(shared, SHARED_KEY);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_increment_count_detected() {
        let ts = TestKv::new(config(1, 0, true)).await;
        let ck = ts.make_clerk(ClientId(0)).await;
        assert_eq!(check_increments(&*ck, ClientId(0), &[]).await.unwrap(), 0);

        increment(ClientId(0), &*ck).await.unwrap();
        increment(ClientId(0), &*ck).await.unwrap();
        assert_eq!(
            check_increments(&*ck, ClientId(0), &[ClientResult { ok: 2, maybe: 0 }])
                .await
                .unwrap(),
            2
        );
        assert!(check_increments(&*ck, ClientId(0), &[ClientResult { ok: 3, maybe: 0 }])
            .await
            .is_err());
    }

    #[test]
    fn test_lock_kind_parse() {
        assert_eq!("naive".parse::<LockKind>(), Ok(LockKind::Naive));
        assert_eq!("Robust".parse::<LockKind>(), Ok(LockKind::Robust));
        assert!("spin".parse::<LockKind>().is_err());
        assert_eq!(LockKind::Robust.to_string(), "robust");
    }
}
