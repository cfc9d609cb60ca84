// quorum-sim/src/simulation/mod.rs

pub mod network;
pub mod node;
pub mod router;
pub mod snapshot;

pub use network::{NetworkSnapshot, NetworkState};
pub use node::{AdminCommand, ProcessHandle, SimulatedProcess};
pub use router::{Router, RouterStats};
pub use snapshot::SimulationSnapshot;

use crate::config::{random_duration_between, RouterMode, SimulationConfig, MAX_DURATION};
use crate::data_structures::{parse_id_list, ElectionId, ProcessId};
use crate::election::node::ElectionNode;
use crate::error::{SimResult, SimulationError};
use crate::history::{ElectionLedger, ElectionRecordSnapshot};
use crate::network::OutboundChannel;
use humantime_serde::re::humantime;
use log::info;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A running cluster plus the administrative control surface over it.
pub struct Simulation {
    config: SimulationConfig,
    network: Arc<NetworkState>,
    ledger: Arc<ElectionLedger>,
    processes: Vec<ProcessHandle>,
    process_tasks: Vec<JoinHandle<()>>,
    router_task: Option<JoinHandle<RouterStats>>,
}

impl Simulation {
    /// Spawns one task per process and the router.
    pub async fn start(config: SimulationConfig) -> SimResult<Self> {
        config.validate()?;
        let size = config.cluster_size;
        info!("[Simulation] Starting {} processes", size);

        let network = Arc::new(NetworkState::new_healthy(size));
        let ledger = Arc::new(ElectionLedger::new());
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);

        let now = Instant::now();
        let mut inboxes = Vec::with_capacity(size);
        let mut processes = Vec::with_capacity(size);
        let mut process_tasks = Vec::with_capacity(size);
        for id in 0..size {
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let (admin_tx, admin_rx) = mpsc::channel(config.admin_capacity);
            let node = ElectionNode::new(
                id,
                &config,
                Arc::clone(&ledger),
                Arc::clone(&network),
                SmallRng::from_entropy(),
                now,
            );
            let process = SimulatedProcess::new(
                node,
                inbound_rx,
                admin_rx,
                Arc::new(OutboundChannel::new(outbound_tx.clone())),
                config.heartbeat_interval,
            );
            inboxes.push(inbound_tx);
            processes.push(ProcessHandle::new(id, admin_tx));
            process_tasks.push(tokio::spawn(process.run()));
        }
        // Only the processes hold outbound senders from here on
        drop(outbound_tx);

        let router = Router::new(outbound_rx, inboxes, Arc::clone(&network), config.router_mode, SmallRng::from_entropy());
        let router_task = tokio::spawn(router.run());

        Ok(Simulation {
            config,
            network,
            ledger,
            processes,
            process_tasks,
            router_task: Some(router_task),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn cluster_size(&self) -> usize {
        self.processes.len()
    }

    pub fn network(&self) -> &Arc<NetworkState> {
        &self.network
    }

    pub fn ledger(&self) -> &Arc<ElectionLedger> {
        &self.ledger
    }

    fn process(&self, id: ProcessId) -> SimResult<&ProcessHandle> {
        self.processes
            .get(id)
            .ok_or(SimulationError::InvalidProcessId { id, cluster_size: self.cluster_size() })
    }

    /// Makes `id` start an election at its next scheduling step.
    pub async fn force_election(&self, id: ProcessId) -> SimResult<()> {
        let process = self.process(id)?;
        info!("[Simulation] Forcing election on process {}", id);
        process.force_election().await
    }

    /// Directed lag `from -> to`, given as e.g. `"250ms"` or `"2s"`.
    pub fn set_lag_between(&self, from: ProcessId, to: ProcessId, spec: &str) -> SimResult<()> {
        let lag = parse_lag(spec)?;
        self.network.set_lag(from, to, lag)
    }

    /// Symmetric lag between `id` and every other process.
    pub fn set_lag_to_peers(&self, id: ProcessId, spec: &str) -> SimResult<()> {
        self.process(id)?;
        let lag = parse_lag(spec)?;
        for peer in (0..self.cluster_size()).filter(|p| *p != id) {
            self.network.set_lag_symmetric(id, peer, lag)?;
        }
        info!("[Simulation] Lag between {} and its peers set to {:?}", id, lag);
        Ok(())
    }

    /// Symmetric random lag, drawn per peer from the configured range.
    pub fn randomize_lag(&self, id: ProcessId) -> SimResult<()> {
        self.process(id)?;
        let mut rng = SmallRng::from_entropy();
        for peer in (0..self.cluster_size()).filter(|p| *p != id) {
            let lag = random_duration_between(&mut rng, self.config.random_lag_min, self.config.random_lag_max);
            self.network.set_lag_symmetric(id, peer, lag)?;
            info!("[Simulation] Lag between {} and {} randomized to {:?}", id, peer, lag);
        }
        Ok(())
    }

    pub fn set_packet_loss_between(&self, from: ProcessId, to: ProcessId, percent: u8) -> SimResult<()> {
        self.network.set_packet_loss(from, to, percent)
    }

    /// Partition from two comma separated id lists, e.g. `("0,1", "2")`.
    pub fn split_network(&self, left: &str, right: &str) -> SimResult<()> {
        let left = parse_id_list(left).map_err(SimulationError::InvalidInput)?;
        let right = parse_id_list(right).map_err(SimulationError::InvalidInput)?;
        self.split_network_ids(&left, &right)
    }

    pub fn split_network_ids(&self, left: &[ProcessId], right: &[ProcessId]) -> SimResult<()> {
        self.network.partition(left, right)
    }

    pub fn heal_network(&self) {
        self.network.heal();
    }

    pub fn election_history(&self, id: ElectionId) -> SimResult<ElectionRecordSnapshot> {
        self.ledger.get(id).map(|r| r.snapshot()).ok_or(SimulationError::NotFound(id))
    }

    /// Current state of every process, the whole ledger and the network.
    pub async fn snapshot(&self) -> SimResult<SimulationSnapshot> {
        let mut processes = Vec::with_capacity(self.processes.len());
        for process in &self.processes {
            processes.push(process.query().await?);
        }
        Ok(SimulationSnapshot {
            processes,
            elections: self.ledger.snapshot_all(),
            network: self.network.snapshot(),
        })
    }

    pub fn lag_matrix_csv(&self) -> String {
        self.network.lag_matrix_csv()
    }

    /// Stops every process. A bounded router is awaited (it ends once the
    /// aborted processes drop their senders and pending deliveries flush) and
    /// its counters returned; an unbounded router is aborted.
    pub async fn shutdown(mut self) -> Option<RouterStats> {
        info!("[Simulation] Shutting down");
        for task in self.process_tasks.drain(..) {
            task.abort();
        }
        let router_task = self.router_task.take()?;
        match self.config.router_mode {
            RouterMode::Bounded(_) => router_task.await.ok(),
            RouterMode::Unbounded => {
                router_task.abort();
                None
            }
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        for task in &self.process_tasks {
            task.abort();
        }
        if let Some(router_task) = &self.router_task {
            router_task.abort();
        }
    }
}

fn parse_lag(spec: &str) -> SimResult<Duration> {
    let lag = humantime::parse_duration(spec.trim())
        .map_err(|e| SimulationError::InvalidInput(format!("bad duration {:?}: {}", spec, e)))?;
    if lag > MAX_DURATION {
        return Err(SimulationError::InvalidInput(format!(
            "lag {:?} exceeds the {:?} limit", spec, MAX_DURATION
        )));
    }
    Ok(lag)
}
