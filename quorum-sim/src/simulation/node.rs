// quorum-sim/src/simulation/node.rs

use crate::data_structures::ProcessId;
use crate::election::node::{ElectionEvent, ElectionNode};
use crate::election::state::ProcessSnapshot;
use crate::error::{SimResult, SimulationError};
use crate::network::{NetworkInterface, NetworkMessage};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

/// Commands from the control surface to one process.
#[derive(Debug)]
pub enum AdminCommand {
    ForceElection,
    Query(oneshot::Sender<ProcessSnapshot>),
}

/// Control-surface side of a running process.
#[derive(Clone, Debug)]
pub struct ProcessHandle {
    pub id: ProcessId,
    admin_tx: mpsc::Sender<AdminCommand>,
}

impl ProcessHandle {
    pub fn new(id: ProcessId, admin_tx: mpsc::Sender<AdminCommand>) -> Self {
        ProcessHandle { id, admin_tx }
    }

    pub async fn force_election(&self) -> SimResult<()> {
        self.admin_tx
            .send(AdminCommand::ForceElection)
            .await
            .map_err(|_| SimulationError::ProcessUnavailable(self.id))
    }

    pub async fn query(&self) -> SimResult<ProcessSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.admin_tx
            .send(AdminCommand::Query(reply_tx))
            .await
            .map_err(|_| SimulationError::ProcessUnavailable(self.id))?;
        reply_rx.await.map_err(|_| SimulationError::ProcessUnavailable(self.id))
    }
}

/// One cluster member: owns its state machine and reacts to inbound
/// ballots, the liveness timer, admin commands and its election deadline.
pub struct SimulatedProcess {
    node: ElectionNode,
    inbound_rx: mpsc::UnboundedReceiver<NetworkMessage>,
    admin_rx: mpsc::Receiver<AdminCommand>,
    network: Arc<dyn NetworkInterface>,
    heartbeat_interval: Duration,
}

impl SimulatedProcess {
    pub fn new(
        node: ElectionNode,
        inbound_rx: mpsc::UnboundedReceiver<NetworkMessage>,
        admin_rx: mpsc::Receiver<AdminCommand>,
        network: Arc<dyn NetworkInterface>,
        heartbeat_interval: Duration,
    ) -> Self {
        SimulatedProcess { node, inbound_rx, admin_rx, network, heartbeat_interval }
    }

    pub async fn run(mut self) {
        let id = self.node.id();
        info!("[Process {}] Starting run loop", id);
        let mut liveness = interval_at(Instant::now() + self.heartbeat_interval, self.heartbeat_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let events = self.node.tick(Instant::now());
            self.dispatch(events).await;

            let deadline = self.node.next_deadline();
            tokio::select! {
                maybe_msg = self.inbound_rx.recv() => {
                    let Some(msg) = maybe_msg else {
                        info!("[Process {}] Inbound queue closed. Stopping run loop.", id);
                        break;
                    };
                    debug!("[Process {}] Received {:?} from {}", id, msg.ballot, msg.sender);
                    let events = self.node.handle_message(msg);
                    self.dispatch(events).await;
                }
                _ = liveness.tick() => {
                    let events = self.node.liveness_heartbeat();
                    self.dispatch(events).await;
                }
                maybe_cmd = self.admin_rx.recv() => {
                    let Some(cmd) = maybe_cmd else {
                        info!("[Process {}] Admin channel closed. Stopping run loop.", id);
                        break;
                    };
                    self.handle_admin(cmd);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
            }
        }
    }

    fn handle_admin(&mut self, cmd: AdminCommand) {
        match cmd {
            AdminCommand::ForceElection => self.node.force_election(),
            AdminCommand::Query(reply_tx) => {
                if reply_tx.send(self.node.snapshot(Instant::now())).is_err() {
                    warn!("[Process {}] Query requester went away", self.node.id());
                }
            }
        }
    }

    async fn dispatch(&mut self, events: Vec<ElectionEvent>) {
        for event in events {
            match event {
                ElectionEvent::SendMessage(msg) => self.network.send_message(msg).await,
                ElectionEvent::Elected { election, frequency, epoch } => {
                    debug!("[Process {}] Won election {} (frequency {}, epoch {})",
                        self.node.id(), election, frequency, epoch);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::election::messages::{Ballot, BallotKind};
    use crate::history::ElectionLedger;
    use crate::network::{LinkConditions, RecordingNetwork};
    use crate::simulation::network::NetworkState;
    use crate::test_utils::{fast_config, wait_for};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    struct Running {
        handle: ProcessHandle,
        inbound_tx: mpsc::UnboundedSender<NetworkMessage>,
        recorder: RecordingNetwork,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_process(id: ProcessId, config: &SimulationConfig) -> Running {
        let ledger = Arc::new(ElectionLedger::new());
        let network = Arc::new(NetworkState::new_healthy(config.cluster_size));
        let node = ElectionNode::new(id, config, ledger, network, SmallRng::seed_from_u64(1), Instant::now());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (admin_tx, admin_rx) = mpsc::channel(4);
        let recorder = RecordingNetwork::new();
        let process = SimulatedProcess::new(
            node,
            inbound_rx,
            admin_rx,
            Arc::new(recorder.clone()),
            config.heartbeat_interval,
        );
        let task = tokio::spawn(process.run());
        Running { handle: ProcessHandle::new(id, admin_tx), inbound_tx, recorder, task }
    }

    #[tokio::test]
    async fn forced_election_reaches_the_network() {
        let config = SimulationConfig { heartbeat_interval: Duration::from_secs(3600), ..fast_config() };
        let p = spawn_process(1, &config);
        p.handle.force_election().await.unwrap();

        let recorder = p.recorder.clone();
        let mut seen = Vec::new();
        assert!(wait_for(Duration::from_secs(2), || {
            seen.extend(recorder.take());
            let done = seen.len() >= 2;
            async move { done }
        }).await);
        assert!(seen.iter().all(|m| m.ballot.kind == BallotKind::ElectMe && m.sender == 1));

        let snapshot = p.handle.query().await.unwrap();
        assert_eq!(snapshot.current_epoch, 1);
        assert!(snapshot.election.is_some());
        p.task.abort();
    }

    #[tokio::test]
    async fn inbound_ballots_update_state() {
        let config = SimulationConfig { heartbeat_interval: Duration::from_secs(3600), ..fast_config() };
        let p = spawn_process(0, &config);
        p.inbound_tx
            .send(NetworkMessage {
                sender: 2,
                receiver: 0,
                ballot: Ballot::heartbeat(4, Some(42), 4),
                link: LinkConditions::HEALTHY,
            })
            .unwrap();

        let handle = p.handle.clone();
        assert!(wait_for(Duration::from_secs(2), || {
            let handle = handle.clone();
            async move { handle.query().await.map(|s| s.frequency == Some(42)).unwrap_or(false) }
        }).await);
        let snapshot = p.handle.query().await.unwrap();
        assert_eq!(snapshot.current_epoch, 4);
        assert_eq!(snapshot.frequency_epoch, 4);
        p.task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_timer_gossips_to_a_peer() {
        let config = SimulationConfig { heartbeat_interval: Duration::from_millis(100), ..fast_config() };
        let p = spawn_process(2, &config);
        tokio::time::sleep(Duration::from_millis(350)).await;

        let sent = p.recorder.take();
        assert!(sent.len() >= 3, "{} heartbeats", sent.len());
        assert!(sent.iter().all(|m| m.ballot.kind == BallotKind::Heartbeat && m.receiver != 2));
        p.task.abort();
    }

    #[tokio::test]
    async fn closed_process_reports_unavailable() {
        let config = fast_config();
        let p = spawn_process(0, &config);
        drop(p.inbound_tx);
        p.task.await.unwrap();
        assert_eq!(p.handle.force_election().await, Err(SimulationError::ProcessUnavailable(0)));
    }
}
