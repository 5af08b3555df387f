//! Per-test fixture: one store server on a simulated network.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use kvlock_checker::{
    CheckResult, CheckStatus, KvModel, LinearizabilityChecker, LinearizabilityConfig,
};
use kvlock_client::Clerk;
use kvlock_core::{ClientId, HistoryMetadata, OpLog};
use kvlock_server::{KeyValueStore, KvServer};
use kvlock_transport::{server_name, Client, Clients, Network};

use crate::annotations::{colors, Annotations, TAG_CHECKER, TAG_FAILURE, TAG_INFO};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::logged_clerk::{LoggedClerk, OpCounter};
use crate::stop::{stop_channel, StopSignal};

/// The clerk handed to workload clients.
pub type TestClerk = LoggedClerk<Clerk<Arc<Client>>>;

/// What one client reports when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientResult {
    /// Operations known to have taken effect.
    pub ok: u64,
    /// Operations that may or may not have taken effect.
    pub maybe: u64,
}

impl ClientResult {
    /// Sums the results of several clients.
    pub fn total(results: &[ClientResult]) -> ClientResult {
        results.iter().fold(ClientResult::default(), |acc, r| ClientResult {
            ok: acc.ok + r.ok,
            maybe: acc.maybe + r.maybe,
        })
    }
}

type RunningClient = (ClientId, Arc<TestClerk>, JoinHandle<Result<ClientResult>>);

#[derive(Debug)]
struct Phase {
    description: String,
    started: Instant,
    rpcs: u64,
    ops: u64,
}

/// A test run against a single `KVServer`.
#[derive(Debug)]
pub struct TestKv {
    config: HarnessConfig,
    network: Network,
    clients: Clients,
    server: String,
    store: Arc<KeyValueStore>,
    log: Arc<OpLog>,
    ops: OpCounter,
    annotations: Arc<Annotations>,
    created: Instant,
    created_at_ms: u64,
    phase: Mutex<Option<Phase>>,
}

impl TestKv {
    /// Starts a server on a fresh network built from `config`.
    pub async fn new(config: HarnessConfig) -> Self {
        let network = Network::new(config.network_config());
        let store = Arc::new(KeyValueStore::new());
        let server = server_name(0, 0);
        network
            .add_server(
                server.clone(),
                KvServer::with_store(store.clone()).into_server(),
            )
            .await;

        let log = Arc::new(OpLog::new());
        let annotations = Arc::new(Annotations::new(log.clone(), config.vis.clone()));

        Self {
            clients: Clients::new(network.clone()),
            network,
            server,
            store,
            log,
            ops: Arc::new(AtomicU64::new(0)),
            annotations,
            created: Instant::now(),
            created_at_ms: wall_clock_ms(),
            phase: Mutex::new(None),
            config,
        }
    }

    /// Starts a server with default settings on a network of the given
    /// reliability.
    pub async fn start(reliable: bool) -> Self {
        Self::new(HarnessConfig::default().with_reliable(reliable)).await
    }

    /// The run configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The simulated network.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// The store behind the server.
    pub fn store(&self) -> &Arc<KeyValueStore> {
        &self.store
    }

    /// The operation log every clerk appends to.
    pub fn log(&self) -> &Arc<OpLog> {
        &self.log
    }

    /// The annotation sink of this test.
    pub fn annotations(&self) -> &Arc<Annotations> {
        &self.annotations
    }

    /// Operations issued so far by all clerks.
    pub fn op_count(&self) -> u64 {
        self.ops.load(Ordering::Relaxed)
    }

    /// Makes a logged clerk for `client` that reaches the server.
    pub async fn make_clerk(&self, client: ClientId) -> Arc<TestClerk> {
        let transport = self.clients.make_client_to(&[self.server.clone()]).await;
        let clerk = Clerk::new(transport, self.server.clone());
        Arc::new(LoggedClerk::new(
            clerk,
            client,
            self.log.clone(),
            self.ops.clone(),
        ))
    }

    /// Disconnects a clerk. Its later calls time out.
    pub async fn delete_clerk(&self, clerk: &TestClerk) {
        self.clients
            .delete_client(clerk.inner().transport())
            .await;
    }

    /// Cuts a clerk off from the server until [`reconnect_clerk`](Self::reconnect_clerk).
    pub async fn disconnect_clerk(&self, clerk: &TestClerk) {
        clerk.inner().transport().disconnect_all().await;
        info!(client = %clerk.client(), "disconnected clerk");
        self.annotations
            .annotate_point(
                TAG_FAILURE,
                format!("disconnect {}", clerk.client()),
                "",
                colors::FAULT,
            )
            .await;
    }

    /// Lets a disconnected clerk reach the server again.
    pub async fn reconnect_clerk(&self, clerk: &TestClerk) {
        clerk
            .inner()
            .transport()
            .connect_to(&[self.server.clone()])
            .await;
        info!(client = %clerk.client(), "reconnected clerk");
        self.annotations
            .annotate_point(
                TAG_FAILURE,
                format!("reconnect {}", clerk.client()),
                "",
                colors::INFO,
            )
            .await;
    }

    /// Switches the network between reliable and unreliable delivery.
    pub async fn set_reliable(&self, reliable: bool) {
        self.network.set_reliable(reliable).await;
        info!(reliable, "network reliability changed");
        self.annotate_faults().await;
    }

    /// Enables or disables long simulated timeouts.
    pub async fn set_long_delays(&self, enabled: bool) {
        self.network.set_long_delays(enabled).await;
        info!(enabled, "long delays changed");
        self.annotate_faults().await;
    }

    /// Enables or disables long reply reordering.
    pub async fn set_long_reordering(&self, enabled: bool) {
        self.network.set_long_reordering(enabled).await;
        info!(enabled, "long reordering changed");
        self.annotate_faults().await;
    }

    // Keeps the open fault interval in step with the network.
    async fn annotate_faults(&self) {
        let config = self.network.config().await;
        let mut faults = Vec::new();
        if !config.reliable {
            faults.push("drops");
        }
        if config.long_delays {
            faults.push("long delays");
        }
        if config.long_reordering {
            faults.push("long reordering");
        }

        if faults.is_empty() {
            self.annotations.annotate_continuous_end(TAG_FAILURE).await;
            return;
        }
        let description = if config.reliable {
            "slow network"
        } else {
            "unreliable network"
        };
        self.annotations
            .annotate_continuous_start(TAG_FAILURE, description, faults.join(", "), colors::FAULT)
            .await;
    }

    /// Starts a test phase and logs what it runs under.
    pub async fn begin(&self, description: impl Into<String>) {
        let description = description.into();
        let reliable = self.network.is_reliable().await;
        info!(
            test = %description,
            reliable,
            clients = self.config.clients,
            "test starting"
        );
        self.annotations
            .annotate_point(
                TAG_INFO,
                description.clone(),
                if reliable { "reliable network" } else { "unreliable network" },
                colors::INFO,
            )
            .await;
        self.annotate_faults().await;

        *self.phase.lock().await = Some(Phase {
            description,
            started: Instant::now(),
            rpcs: self.network.rpc_total(),
            ops: self.op_count(),
        });
    }

    /// Ends the current phase and logs its summary.
    pub async fn end(&self) -> Result<()> {
        self.annotations.annotate_continuous_end(TAG_FAILURE).await;
        self.check_timeout()?;
        let Some(phase) = self.phase.lock().await.take() else {
            return Ok(());
        };
        info!(
            test = %phase.description,
            reliable = self.network.is_reliable().await,
            elapsed_ms = phase.started.elapsed().as_millis() as u64,
            rpcs = self.network.rpc_total() - phase.rpcs,
            ops = self.op_count() - phase.ops,
            "test passed"
        );
        Ok(())
    }

    /// Fails once the test has run past its wall-clock ceiling.
    pub fn check_timeout(&self) -> Result<()> {
        let limit = self.config.test_timeout();
        if self.created.elapsed() > limit {
            return Err(HarnessError::Timeout(limit));
        }
        Ok(())
    }

    fn remaining(&self) -> Duration {
        self.config
            .test_timeout()
            .saturating_sub(self.created.elapsed())
    }

    /// Checks that everything logged so far is linearizable within `budget`.
    ///
    /// An undecided check passes with a warning.
    pub async fn check_linearizable(&self, budget: Duration) -> Result<CheckResult> {
        let network = self.network.config().await;
        let mut metadata = HistoryMetadata::new(self.created_at_ms)
            .with_end_time(wall_clock_ms())
            .with_num_clients(self.config.clients as u32)
            .with_reliable(network.reliable)
            .with_extra("long_delays", serde_json::json!(network.long_delays))
            .with_extra("long_reordering", serde_json::json!(network.long_reordering))
            .with_extra("rpcs", serde_json::json!(self.network.rpc_total()));
        if let Some(phase) = self.phase.lock().await.as_ref() {
            metadata = metadata.with_name(phase.description.clone());
        }
        let history = self.log.freeze(metadata).await;

        let started = self.log.timestamp();
        let checker = LinearizabilityChecker::with_config(
            KvModel,
            LinearizabilityConfig::new()
                .with_timeout(budget)
                .with_max_states(self.config.linearizability_max_states),
        );
        let result = checker.check(&history).await;

        match result.status.clone() {
            CheckStatus::Legal => {
                self.annotations
                    .annotate_interval(TAG_CHECKER, started, "linearizable", "", colors::SUCCESS)
                    .await;
                self.annotations
                    .visualize(&history, false, "test passed")
                    .await?;
                info!(
                    operations = history.len(),
                    clients = history.clients().len(),
                    "history is linearizable"
                );
                Ok(result)
            }
            CheckStatus::Unknown(reason) => {
                self.annotations
                    .annotate_interval(TAG_CHECKER, started, "unknown", reason.as_str(), colors::NEUTRAL)
                    .await;
                self.annotations
                    .visualize(&history, false, "test passed")
                    .await?;
                warn!(
                    operations = history.len(),
                    reason = %reason,
                    diagnostics = ?result.diagnostics,
                    "linearizability check timed out, assuming history is ok"
                );
                Ok(result)
            }
            CheckStatus::Illegal => {
                self.annotations
                    .annotate_interval(TAG_CHECKER, started, "not linearizable", "", colors::FAILURE)
                    .await;
                self.annotations
                    .visualize(&history, true, "test failed")
                    .await?;
                match result.counterexample {
                    Some(ce) => Err(HarnessError::NotLinearizable(Box::new(ce))),
                    None => Err(HarnessError::config("illegal history without counterexample")),
                }
            }
        }
    }

    /// Runs `n` clients for `duration` and collects one result per client.
    ///
    /// Each client gets a fresh clerk and runs `f` until it returns. The
    /// stop signal is raised after `duration`; clients are expected to
    /// check it between operations. A client that fails or panics fails
    /// the whole run, and the clients still running are aborted.
    pub async fn spawn_clients_and_wait<F, Fut>(
        &self,
        n: usize,
        duration: Duration,
        f: F,
    ) -> Result<Vec<ClientResult>>
    where
        F: Fn(ClientId, Arc<TestClerk>, StopSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ClientResult>> + Send + 'static,
    {
        let f = Arc::new(f);
        let (stop, signal) = stop_channel();

        let mut handles = Vec::with_capacity(n);
        for i in 0..n {
            let client = ClientId(i as u32);
            let clerk = self.make_clerk(client).await;
            let f = f.clone();
            let signal = signal.clone();
            handles.push((
                client,
                clerk.clone(),
                tokio::spawn(async move { f(client, clerk, signal).await }),
            ));
        }

        tokio::time::sleep(duration).await;
        stop.stop();

        let deadline = self.remaining();
        let mut results = Vec::with_capacity(n);
        for i in 0..handles.len() {
            match self.join_client(&mut handles[i], deadline).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(error = %err, clients = handles.len(), "aborting clients");
                    for (_, _, handle) in &handles {
                        handle.abort();
                    }
                    return Err(err);
                }
            }
        }
        Ok(results)
    }

    async fn join_client(
        &self,
        running: &mut RunningClient,
        deadline: Duration,
    ) -> Result<ClientResult> {
        let (client, clerk, handle) = running;
        let joined = tokio::time::timeout(deadline, handle)
            .await
            .map_err(|_| HarnessError::Timeout(self.config.test_timeout()))?;
        let result = match joined {
            Ok(result) => result?,
            Err(err) => return Err(HarnessError::client_failed(*client, panic_message(err))),
        };
        self.delete_clerk(clerk.as_ref()).await;
        Ok(result)
    }

    /// Tears the test down, writing an annotation timeline if the mode asks
    /// for one.
    pub async fn cleanup(&self, failed: bool) -> Result<()> {
        let outcome = if failed { "test failed" } else { "test passed" };
        self.annotations.cleanup(failed, outcome).await?;
        self.clients.cleanup().await;
        self.network.cleanup().await;
        Ok(())
    }
}

fn wall_clock_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}
