// Epoch election state machine for one process.
//
// Pure and synchronous: the actor in simulation::node feeds it ballots,
// ticks and admin commands, and forwards the returned events.

use crate::config::{random_duration_between, SimulationConfig};
use crate::data_structures::{ElectionId, Epoch, Frequency, ProcessId};
use crate::election::messages::{Ballot, BallotKind};
use crate::election::state::{Election, ProcessSnapshot, ProcessState};
use crate::history::ElectionLedger;
use crate::network::NetworkMessage;
use crate::simulation::network::NetworkState;
use log::{debug, info, trace};
use rand::rngs::SmallRng;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// Roughly 30 years, the same horizon tokio uses for an unreachable sleep.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

// `now + delay`, clamped so an oversized delay never overflows.
fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Output of a state-machine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionEvent {
    SendMessage(NetworkMessage),
    // This process won an election and adopted its value
    Elected { election: ElectionId, frequency: Frequency, epoch: Epoch },
}

pub struct ElectionNode {
    pub state: ProcessState,
    cluster_size: usize,
    backoff_min: Duration,
    backoff_max: Duration,
    frequency_range: u32,
    ledger: Arc<ElectionLedger>,
    network: Arc<NetworkState>,
    rng: SmallRng,
}

// Manual Debug: the ledger and network are shared and large
impl fmt::Debug for ElectionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElectionNode")
            .field("state", &self.state)
            .field("cluster_size", &self.cluster_size)
            .finish()
    }
}

impl ElectionNode {
    pub fn new(
        id: ProcessId,
        config: &SimulationConfig,
        ledger: Arc<ElectionLedger>,
        network: Arc<NetworkState>,
        rng: SmallRng,
        now: Instant,
    ) -> Self {
        // Process 0 is the designated first candidate; the others hold off
        let first_delay = if id == 0 { config.bootstrap_delay } else { config.follower_startup_delay };
        ElectionNode {
            state: ProcessState::new(id, deadline_after(now, first_delay)),
            cluster_size: config.cluster_size,
            backoff_min: config.election_backoff_min,
            backoff_max: config.election_backoff_max,
            frequency_range: config.frequency_range,
            ledger,
            network,
            rng,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.state.id
    }

    pub fn snapshot(&self, now: Instant) -> ProcessSnapshot {
        self.state.snapshot(now)
    }

    /// When the actor must call `tick` again even if nothing else happens.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.state.election_forced {
            return Some(Instant::now());
        }
        self.state.frequency.is_none().then_some(self.state.next_election_deadline)
    }

    /// Admin override: the next `tick` starts an election whatever the deadline.
    pub fn force_election(&mut self) {
        info!("[Process {}] Election forced", self.state.id);
        self.state.election_forced = true;
    }

    // Scheduling step
    pub fn tick(&mut self, now: Instant) -> Vec<ElectionEvent> {
        let wants_election = self.state.election_forced
            || (self.state.frequency.is_none() && now >= self.state.next_election_deadline);
        if wants_election {
            self.start_election(now)
        } else {
            Vec::new()
        }
    }

    /// Liveness gossip: current view of the frequency to one random peer.
    pub fn liveness_heartbeat(&mut self) -> Vec<ElectionEvent> {
        if self.cluster_size < 2 {
            return Vec::new();
        }
        // uniform over every id except our own
        let mut peer = self.rng.gen_range(0..self.cluster_size - 1);
        if peer >= self.state.id {
            peer += 1;
        }
        let ballot = Ballot::heartbeat(self.state.current_epoch, self.state.frequency, self.state.frequency_epoch);
        trace!("[Process {}] Liveness heartbeat to {}: {:?}", self.state.id, peer, ballot);
        vec![ElectionEvent::SendMessage(self.envelope(peer, ballot))]
    }

    pub fn handle_message(&mut self, message: NetworkMessage) -> Vec<ElectionEvent> {
        self.observe_epoch(message.ballot.epoch);
        match message.ballot.kind {
            BallotKind::Heartbeat => {
                self.handle_heartbeat(&message);
                Vec::new()
            }
            BallotKind::ElectMe => self.handle_elect_me(message),
            BallotKind::VoteGranted => self.handle_vote_granted(message),
        }
    }

    fn peers(&self) -> impl Iterator<Item = ProcessId> {
        let me = self.state.id;
        (0..self.cluster_size).filter(move |p| *p != me)
    }

    fn envelope(&self, receiver: ProcessId, ballot: Ballot) -> NetworkMessage {
        NetworkMessage {
            sender: self.state.id,
            receiver,
            ballot,
            link: self.network.link(self.state.id, receiver),
        }
    }

    // The epoch only ever moves forward. A candidate that learns of a newer
    // epoch gives up its candidacy.
    fn observe_epoch(&mut self, epoch: Epoch) {
        if epoch <= self.state.current_epoch {
            return;
        }
        debug!("[Process {}] Epoch {} -> {}", self.state.id, self.state.current_epoch, epoch);
        self.state.current_epoch = epoch;
        if let Some(election) = self.state.election.take() {
            info!("[Process {}] Abandoning election {} (epoch {}), saw epoch {}",
                self.state.id, election.record.id, election.epoch, epoch);
            election.record.mark_outcome(false);
        }
    }

    fn start_election(&mut self, now: Instant) -> Vec<ElectionEvent> {
        self.state.election_forced = false;
        // Random wait between attempts for an election
        let backoff = random_duration_between(&mut self.rng, self.backoff_min, self.backoff_max);
        self.state.next_election_deadline = deadline_after(now, backoff);

        if let Some(previous) = self.state.election.take() {
            debug!("[Process {}] Replacing unfinished election {}", self.state.id, previous.record.id);
            previous.record.mark_outcome(false);
        }

        self.state.current_epoch += 1;
        self.state.last_vote_epoch = self.state.current_epoch;
        let epoch = self.state.current_epoch;
        let proposed = self.rng.gen_range(0..self.frequency_range);
        let record = self.ledger.open(self.state.id, proposed, epoch);
        let election = Election {
            new_frequency: proposed,
            epoch,
            votes: 1,
            electors: self.cluster_size,
            record: Arc::clone(&record),
        };
        info!("[Process {}] Sending elect_me. Election {} epoch {} frequency {} (next attempt in {:?})",
            self.state.id, record.id, epoch, proposed, backoff);

        let mut events = Vec::new();
        for peer in self.peers() {
            let ballot = Ballot::elect_me(epoch, proposed, self.state.frequency_epoch, record.id);
            let message = self.envelope(peer, ballot);
            record.record_sent(message.clone());
            events.push(ElectionEvent::SendMessage(message));
        }

        if election.has_quorum() {
            // One-process cluster: the self-vote is a majority
            events.extend(self.win(election));
        } else {
            self.state.election = Some(election);
        }
        events
    }

    fn handle_heartbeat(&mut self, message: &NetworkMessage) {
        let ballot = &message.ballot;
        if ballot.frequency_epoch <= self.state.frequency_epoch {
            return;
        }
        let Some(frequency) = ballot.frequency else {
            return;
        };
        self.state.frequency = Some(frequency);
        self.state.frequency_epoch = ballot.frequency_epoch;
        info!("[Process {}] Updating from heartbeat of {}. New frequency: {} New epoch: {}",
            self.state.id, message.sender, frequency, ballot.frequency_epoch);

        // Someone already settled our epoch (or a later one)
        let settled = self
            .state
            .election
            .as_ref()
            .is_some_and(|e| e.epoch <= ballot.frequency_epoch);
        if settled {
            if let Some(election) = self.state.election.take() {
                info!("[Process {}] Election {} superseded by frequency epoch {}",
                    self.state.id, election.record.id, ballot.frequency_epoch);
                election.record.mark_outcome(false);
            }
        }
    }

    fn handle_elect_me(&mut self, message: NetworkMessage) -> Vec<ElectionEvent> {
        let ballot = &message.ballot;
        // Do not vote if: I have a more recent view of time than the
        // candidate, I already voted in this epoch, or my last frequency
        // change is more recent than the candidate's.
        let refuse = self.state.current_epoch > ballot.epoch
            || self.state.last_vote_epoch >= self.state.current_epoch
            || self.state.frequency_epoch > ballot.frequency_epoch;

        let mut events = Vec::new();
        if refuse {
            debug!("[Process {}] Not voting for {}. Epoch: {} LastVoteEpoch: {} FrequencyEpoch: {} Ballot: {:?}",
                self.state.id, message.sender, self.state.current_epoch, self.state.last_vote_epoch,
                self.state.frequency_epoch, ballot);
        } else {
            self.state.last_vote_epoch = self.state.current_epoch;
            debug!("[Process {}] You have my vote, {}. Frequency: {:?} Epoch: {}",
                self.state.id, message.sender, ballot.frequency, ballot.epoch);
            let reply = Ballot::vote_granted(self.state.current_epoch, self.state.frequency_epoch, ballot.election);
            events.push(ElectionEvent::SendMessage(self.envelope(message.sender, reply)));
        }

        if let Some(record) = ballot.election.and_then(|id| self.ledger.get(id)) {
            record.record_received(message.clone(), self.state.state_snapshot(), !refuse);
        }
        events
    }

    fn handle_vote_granted(&mut self, message: NetworkMessage) -> Vec<ElectionEvent> {
        let ballot = &message.ballot;
        let current_epoch = self.state.current_epoch;
        let counted = match self.state.election.as_mut() {
            Some(election)
                if ballot.epoch >= current_epoch
                    && ballot.election.map_or(true, |id| id == election.record.id) =>
            {
                election.votes += 1;
                debug!("[Process {}] Received vote from {}. Election {} now has {}/{} votes",
                    self.state.id, message.sender, election.record.id, election.votes, election.electors);
                true
            }
            _ => {
                debug!("[Process {}] Ignoring stale vote from {} (epoch {}, current {})",
                    self.state.id, message.sender, ballot.epoch, current_epoch);
                false
            }
        };

        if let Some(record) = ballot.election.and_then(|id| self.ledger.get(id)) {
            record.record_received(message.clone(), self.state.state_snapshot(), counted);
        }

        let won = counted && self.state.election.as_ref().is_some_and(Election::has_quorum);
        if !won {
            return Vec::new();
        }
        match self.state.election.take() {
            Some(election) => self.win(election),
            None => Vec::new(),
        }
    }

    // Adopt the proposal, close the record, and tell every peer.
    fn win(&mut self, election: Election) -> Vec<ElectionEvent> {
        debug_assert!(election.epoch >= self.state.frequency_epoch);
        self.state.frequency = Some(election.new_frequency);
        self.state.frequency_epoch = election.epoch;
        election.record.mark_outcome(true);
        info!("[Process {}] New frequency elected: {} (election {}, epoch {}, {}/{} votes)",
            self.state.id, election.new_frequency, election.record.id, election.epoch,
            election.votes, election.electors);

        let mut events = vec![ElectionEvent::Elected {
            election: election.record.id,
            frequency: election.new_frequency,
            epoch: election.epoch,
        }];
        for peer in self.peers() {
            let ballot = Ballot::heartbeat(self.state.current_epoch, self.state.frequency, self.state.frequency_epoch)
                .for_election(election.record.id);
            let message = self.envelope(peer, ballot);
            election.record.record_sent(message.clone());
            events.push(ElectionEvent::SendMessage(message));
        }
        events
    }
}
