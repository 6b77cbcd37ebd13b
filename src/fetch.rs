//! Multi-protocol fetch scheduler.
//!
//! A [`Fetcher`] runs one [`FetchGroup`] per configured [`ReceiverKind`].
//! Each group walks its `(protocol, network, address)` coverage in a fixed
//! round-robin order, pacing every remote call with a single backoff clock
//! shared by everything that kind serves. Per-address failures are logged
//! and never stop the loop; the only way out is the shutdown signal.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::address::Protocol;
use crate::backoff::Backoff;
use crate::blockchain::Receiver;
use crate::inbox::Inbox;
use crate::types::{ChainMailError, Result};

/// Initial interval used when a configured override is zero.
pub const DEFAULT_INITIAL_INTERVAL_MS: u64 = 10_000;

/// Default backoff ceiling.
pub const DEFAULT_MAX_INTERVAL_MS: u64 = 300_000;

/// Default backoff growth factor.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Default limit on a single receive call.
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// Receiver Kinds
// ============================================================================

/// Remote API flavours a [`Receiver`] can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReceiverKind {
    /// Etherscan without an API key (heavily rate limited).
    EtherscanNoAuth,
    /// Etherscan with an API key.
    Etherscan,
    /// Blockscout explorer API.
    Blockscout,
    /// Algorand node REST API.
    Algod,
    /// Substrate JSON-RPC node.
    SubstrateRpc,
}

impl ReceiverKind {
    /// All supported kinds.
    pub const ALL: [ReceiverKind; 5] = [
        ReceiverKind::EtherscanNoAuth,
        ReceiverKind::Etherscan,
        ReceiverKind::Blockscout,
        ReceiverKind::Algod,
        ReceiverKind::SubstrateRpc,
    ];

    /// Configuration name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverKind::EtherscanNoAuth => "etherscan-no-auth",
            ReceiverKind::Etherscan => "etherscan",
            ReceiverKind::Blockscout => "blockscout",
            ReceiverKind::Algod => "algod",
            ReceiverKind::SubstrateRpc => "substrate-rpc",
        }
    }

    /// Initial backoff interval for this kind, in milliseconds.
    pub fn default_initial_interval_ms(&self) -> u64 {
        match self {
            ReceiverKind::EtherscanNoAuth => 5_000,
            ReceiverKind::Etherscan => 200,
            ReceiverKind::Blockscout => 1_000,
            ReceiverKind::Algod => 1_000,
            ReceiverKind::SubstrateRpc => 1_000,
        }
    }
}

impl fmt::Display for ReceiverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiverKind {
    type Err = ChainMailError;

    fn from_str(s: &str) -> Result<Self> {
        ReceiverKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ChainMailError::Configuration(format!("unknown receiver kind: {}", s)))
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Addresses watched on one network through one receiver kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageEntry {
    /// Chain protocol of the watched addresses.
    pub protocol: Protocol,
    /// Network name within the protocol, e.g. `mainnet`.
    pub network: String,
    /// Receiver kind that serves this network.
    pub kind: ReceiverKind,
    /// Addresses in the protocol's text form.
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl CoverageEntry {
    /// Creates an entry with no addresses.
    pub fn new(protocol: Protocol, network: impl Into<String>, kind: ReceiverKind) -> Self {
        Self {
            protocol,
            network: network.into(),
            kind,
            addresses: Vec::new(),
        }
    }

    /// Add a watched address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    /// The `protocol.network` label for this entry.
    pub fn label(&self) -> String {
        format!("{}.{}", self.protocol, self.network)
    }
}

/// Scheduler tuning, built once at startup.
///
/// All intervals are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Networks and addresses to watch.
    pub coverage: Vec<CoverageEntry>,
    /// Initial interval overrides keyed by receiver kind name. Zero selects
    /// [`DEFAULT_INITIAL_INTERVAL_MS`].
    pub initial_interval_ms: HashMap<String, u64>,
    /// Backoff ceiling.
    pub max_interval_ms: u64,
    /// Backoff growth factor applied after each failure.
    pub multiplier: f64,
    /// Limit on a single receive call.
    pub receive_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            coverage: Vec::new(),
            initial_interval_ms: HashMap::new(),
            max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
            multiplier: DEFAULT_MULTIPLIER,
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
        }
    }
}

impl SchedulerConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SchedulerConfig = serde_json::from_str(json)
            .map_err(|e| ChainMailError::Configuration(format!("invalid scheduler config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Add a coverage entry.
    pub fn with_coverage(mut self, entry: CoverageEntry) -> Self {
        self.coverage.push(entry);
        self
    }

    /// Override the initial interval for a kind.
    pub fn with_initial_interval(mut self, kind: ReceiverKind, interval_ms: u64) -> Self {
        self.initial_interval_ms
            .insert(kind.as_str().to_string(), interval_ms);
        self
    }

    /// Check tuning values, override keys and every watched address.
    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ChainMailError::Configuration(format!(
                "multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_interval_ms == 0 {
            return Err(ChainMailError::Configuration(
                "max_interval_ms must be positive".to_string(),
            ));
        }
        if self.receive_timeout_ms == 0 {
            return Err(ChainMailError::Configuration(
                "receive_timeout_ms must be positive".to_string(),
            ));
        }
        for name in self.initial_interval_ms.keys() {
            name.parse::<ReceiverKind>()?;
        }
        for entry in &self.coverage {
            if entry.network.is_empty() {
                return Err(ChainMailError::Configuration(format!(
                    "empty network for {} coverage",
                    entry.protocol
                )));
            }
            for address in &entry.addresses {
                entry.protocol.decode_address(address).map_err(|e| {
                    ChainMailError::Configuration(format!("{}: {}", entry.label(), e))
                })?;
            }
        }
        Ok(())
    }

    /// Initial backoff interval for a kind.
    pub fn initial_interval(&self, kind: ReceiverKind) -> Duration {
        let ms = match self.initial_interval_ms.get(kind.as_str()) {
            Some(0) => DEFAULT_INITIAL_INTERVAL_MS,
            Some(ms) => *ms,
            None => kind.default_initial_interval_ms(),
        };
        Duration::from_millis(ms)
    }

    /// Distinct kinds named by the coverage, sorted.
    pub fn kinds(&self) -> Vec<ReceiverKind> {
        let mut kinds: Vec<ReceiverKind> = self.coverage.iter().map(|e| e.kind).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

// ============================================================================
// Receiver Registry
// ============================================================================

/// Receivers available to the scheduler, one per kind.
#[derive(Default, Clone)]
pub struct ReceiverRegistry {
    receivers: HashMap<ReceiverKind, Arc<dyn Receiver>>,
}

impl ReceiverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receiver under its own kind, replacing any previous one.
    pub fn with_receiver(mut self, receiver: Arc<dyn Receiver>) -> Self {
        self.receivers.insert(receiver.kind(), receiver);
        self
    }

    /// Receiver registered for `kind`.
    pub fn get(&self, kind: ReceiverKind) -> Option<Arc<dyn Receiver>> {
        self.receivers.get(&kind).cloned()
    }

    /// Whether a receiver is registered for `kind`.
    pub fn contains(&self, kind: ReceiverKind) -> bool {
        self.receivers.contains_key(&kind)
    }
}

// ============================================================================
// Fetch Group
// ============================================================================

#[derive(Debug, Clone)]
struct Target {
    protocol: Protocol,
    network: String,
    address: Vec<u8>,
}

/// One scheduling worker: all coverage served by a single receiver kind.
pub struct FetchGroup {
    kind: ReceiverKind,
    /// `protocol.network` labels in configuration order.
    networks: Vec<String>,
    /// Raw watched addresses per label.
    addresses: HashMap<String, Vec<Vec<u8>>>,
    /// Round-robin visiting order, flattened from `networks` and `addresses`.
    targets: Vec<Target>,
    receiver: Arc<dyn Receiver>,
    inbox: Arc<dyn Inbox>,
    backoff: Backoff,
    receive_timeout: Duration,
}

impl FetchGroup {
    fn new(
        kind: ReceiverKind,
        config: &SchedulerConfig,
        receiver: Arc<dyn Receiver>,
        inbox: Arc<dyn Inbox>,
    ) -> Result<Self> {
        let mut networks: Vec<String> = Vec::new();
        let mut addresses: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
        let mut targets = Vec::new();

        for entry in config.coverage.iter().filter(|e| e.kind == kind) {
            let label = entry.label();
            if !networks.contains(&label) {
                networks.push(label.clone());
            }
            let watched = addresses.entry(label).or_default();
            for text in &entry.addresses {
                let raw = entry.protocol.decode_address(text)?;
                if watched.contains(&raw) {
                    continue;
                }
                watched.push(raw.clone());
                targets.push(Target {
                    protocol: entry.protocol,
                    network: entry.network.clone(),
                    address: raw,
                });
            }
        }

        Ok(Self {
            kind,
            networks,
            addresses,
            targets,
            receiver,
            inbox,
            backoff: Backoff::new(
                config.initial_interval(kind),
                Duration::from_millis(config.max_interval_ms),
                config.multiplier,
            ),
            receive_timeout: Duration::from_millis(config.receive_timeout_ms),
        })
    }

    /// Receiver kind served by this group.
    pub fn kind(&self) -> ReceiverKind {
        self.kind
    }

    /// Covered `protocol.network` labels.
    pub fn networks(&self) -> &[String] {
        &self.networks
    }

    /// Raw addresses watched under a `protocol.network` label.
    pub fn addresses(&self, label: &str) -> &[Vec<u8>] {
        self.addresses.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The wait before the next receive call.
    pub fn current_interval(&self) -> Duration {
        self.backoff.current()
    }

    /// Receive once for an address and record what was found.
    ///
    /// Success resets the backoff. A missing network leaves it unchanged;
    /// any other failure grows it. Does not wait out the interval.
    pub async fn poll_address(
        &mut self,
        protocol: Protocol,
        network: &str,
        address: &[u8],
    ) -> Result<usize> {
        let received = tokio::time::timeout(
            self.receive_timeout,
            self.receiver.receive(protocol, network, address),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ChainMailError::Transport(format!(
                "receive timed out after {}ms",
                self.receive_timeout.as_millis()
            )))
        });

        let transactions = match received {
            Ok(transactions) => transactions,
            Err(e) => {
                if !e.is_network_not_supported() {
                    self.backoff.increase();
                }
                return Err(e);
            }
        };

        let count = transactions.len();
        for tx in transactions {
            let hash = tx.hash_hex();
            if let Err(e) = self.inbox.put_transaction(protocol, network, address, tx).await {
                warn!(kind = %self.kind, %protocol, network, tx = %hash, error = %e, "failed to store transaction");
            }
        }
        self.backoff.reset();
        Ok(count)
    }

    /// Visit every target once. Returns false if shutdown was signalled.
    async fn run_pass(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        for i in 0..self.targets.len() {
            let target = self.targets[i].clone();

            tokio::select! {
                _ = shutdown.changed() => return false,
                _ = tokio::time::sleep(self.backoff.current()) => {}
            }

            let outcome = tokio::select! {
                _ = shutdown.changed() => return false,
                outcome = self.poll_address(target.protocol, &target.network, &target.address) => outcome,
            };

            let address = target.protocol.encode_address(&target.address);
            match outcome {
                Ok(count) => {
                    debug!(kind = %self.kind, protocol = %target.protocol, network = %target.network, %address, count, "received transactions");
                }
                Err(e) if e.is_network_not_supported() => {
                    info!(
                        kind = %self.kind,
                        protocol = %target.protocol,
                        network = %target.network,
                        "receiver has no endpoint for this network, skipping {}",
                        address
                    );
                }
                Err(e) => {
                    warn!(
                        kind = %self.kind,
                        protocol = %target.protocol,
                        network = %target.network,
                        %address,
                        error = %e,
                        next_interval_ms = self.backoff.current().as_millis() as u64,
                        "receive failed"
                    );
                }
            }
        }
        true
    }

    /// Run passes until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(kind = %self.kind, networks = ?self.networks, targets = self.targets.len(), "fetch worker started");

        if self.targets.is_empty() {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        } else {
            let mut passes: u64 = 0;
            while !*shutdown.borrow() {
                if !self.run_pass(&mut shutdown).await {
                    break;
                }
                passes += 1;
                debug!(kind = %self.kind, passes, "fetch pass complete");
            }
        }

        info!(kind = %self.kind, "fetch worker stopped");
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// All fetch groups, ready to start.
pub struct Fetcher {
    groups: Vec<FetchGroup>,
}

impl Fetcher {
    /// Validate the configuration and build one group per configured kind.
    ///
    /// Fails with [`ChainMailError::Configuration`] if any configured kind has
    /// no registered receiver.
    pub fn new(
        config: &SchedulerConfig,
        registry: &ReceiverRegistry,
        inbox: Arc<dyn Inbox>,
    ) -> Result<Self> {
        config.validate()?;

        let groups = config
            .kinds()
            .into_iter()
            .map(|kind| {
                let receiver = registry.get(kind).ok_or_else(|| {
                    ChainMailError::Configuration(format!("no receiver registered for {}", kind))
                })?;
                FetchGroup::new(kind, config, receiver, inbox.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { groups })
    }

    /// Groups in receiver kind order.
    pub fn groups(&self) -> &[FetchGroup] {
        &self.groups
    }

    /// Spawn every group on the current runtime.
    ///
    /// Workers run until the returned handle is shut down or dropped.
    #[must_use = "dropping the handle stops every fetch worker"]
    pub fn start(self) -> FetcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = self
            .groups
            .into_iter()
            .map(|group| tokio::spawn(group.run(shutdown_rx.clone())))
            .collect();

        FetcherHandle { shutdown_tx, tasks }
    }
}

/// Handle to running fetch workers.
///
/// Dropping the handle closes the shutdown channel, so every worker stops at
/// its next wait. Use [`FetcherHandle::shutdown`] to also join them.
#[must_use = "dropping the handle stops every fetch worker"]
pub struct FetcherHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl FetcherHandle {
    /// Number of spawned workers, one per receiver kind.
    pub fn worker_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every worker to stop and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "fetch worker panicked");
            }
        }
    }
}
