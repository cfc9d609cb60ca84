// quorum-sim/tests/election_scenarios.rs
//
// Whole-cluster runs: real processes, real router, millisecond timings.

use quorum_sim::{
    data_structures::{ElectionId, ProcessRole},
    election::BallotKind,
    simulation::Simulation,
    test_utils::{fast_config, wait_for},
    SimulationConfig,
};
use std::time::Duration;

const PATIENCE: Duration = Duration::from_secs(5);

async fn all_hold(sim: &Simulation, frequency: u32, epoch: u64) -> bool {
    match sim.snapshot().await {
        Ok(snapshot) => snapshot
            .processes
            .iter()
            .all(|p| p.frequency == Some(frequency) && p.frequency_epoch == epoch),
        Err(_) => false,
    }
}

async fn converged(sim: &Simulation, frequency: u32, epoch: u64) -> bool {
    wait_for(PATIENCE, move || all_hold(sim, frequency, epoch)).await
}

async fn succeeded(sim: &Simulation, election: ElectionId) -> bool {
    wait_for(PATIENCE, move || async move {
        sim.ledger().get(election).is_some_and(|r| r.is_successful())
    })
    .await
}

fn vote_receipts(sim: &Simulation, election: ElectionId) -> usize {
    sim.election_history(election)
        .map(|r| r.received.iter().filter(|b| b.message.ballot.kind == BallotKind::VoteGranted).count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_forced_election_on_healthy_cluster() {
    let sim = Simulation::start(fast_config()).await.unwrap();
    sim.force_election(1).await.unwrap();

    assert!(succeeded(&sim, 0).await, "election 0 never succeeded");
    let record = sim.election_history(0).unwrap();
    assert_eq!(record.elector_id, 1);
    assert_eq!(record.epoch, 1);
    assert!(converged(&sim, record.requested_frequency, 1).await);

    // both peers voted; the second vote arrives after quorum and is not counted
    let s = &sim;
    assert!(wait_for(PATIENCE, move || async move { vote_receipts(s, 0) == 2 }).await);
    let record = sim.election_history(0).unwrap();
    let votes: Vec<_> = record
        .received
        .iter()
        .filter(|b| b.message.ballot.kind == BallotKind::VoteGranted)
        .collect();
    assert!(votes.iter().filter(|b| b.granted).count() >= 1);
    assert!(votes.iter().all(|b| b.receiver_state.id == 1));

    // two elect-me plus two win heartbeats
    assert_eq!(record.sent.len(), 4);
    assert_eq!(sim.ledger().records_by(1).len(), 1);
    assert_eq!(sim.ledger().len(), 1);
    assert_eq!(sim.snapshot().await.unwrap().successful_elections().count(), 1);

    let snapshot = sim.snapshot().await.unwrap();
    assert!(snapshot.processes.iter().all(|p| p.role == ProcessRole::Follower));
    sim.shutdown().await;
}

#[tokio::test]
async fn test_partitioned_candidate_cannot_win_until_healed() {
    let sim = Simulation::start(fast_config()).await.unwrap();
    sim.split_network_ids(&[0], &[1, 2]).unwrap();
    sim.force_election(0).await.unwrap();

    let s = &sim;
    assert!(wait_for(PATIENCE, move || async move { s.ledger().len() == 1 }).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let isolated = sim.election_history(0).unwrap();
    assert!(!isolated.successful);
    assert!(isolated.received.is_empty());
    let snapshot = sim.snapshot().await.unwrap();
    assert_eq!(snapshot.processes[0].role, ProcessRole::Candidate);
    assert_eq!(snapshot.processes[0].frequency, None);
    assert!(snapshot.processes[1..].iter().all(|p| p.current_epoch == 0 && p.frequency.is_none()));

    sim.heal_network();
    sim.force_election(0).await.unwrap();
    assert!(succeeded(&sim, 1).await, "election after heal never succeeded");

    let retry = sim.election_history(1).unwrap();
    assert_eq!(retry.elector_id, 0);
    assert_eq!(retry.epoch, 2);
    assert!(converged(&sim, retry.requested_frequency, 2).await);

    // the isolated attempt was concluded when the retry replaced it
    let isolated = sim.election_history(0).unwrap();
    assert!(!isolated.successful);
    assert!(isolated.concluded_at.is_some());
    sim.shutdown().await;
}

#[tokio::test]
async fn test_lagging_links_still_converge() {
    let sim = Simulation::start(fast_config()).await.unwrap();
    sim.set_lag_to_peers(2, "120ms").unwrap();
    sim.force_election(2).await.unwrap();

    assert!(succeeded(&sim, 0).await);
    let record = sim.election_history(0).unwrap();
    // nothing can come back before a full round trip
    let concluded = record.concluded_at.unwrap();
    assert!(concluded - record.opened_at >= chrono::Duration::milliseconds(200));
    assert!(converged(&sim, record.requested_frequency, 1).await);
    sim.shutdown().await;
}

#[tokio::test]
async fn test_single_process_cluster_elects_itself() {
    let config = SimulationConfig { cluster_size: 1, ..fast_config() };
    let sim = Simulation::start(config).await.unwrap();
    sim.force_election(0).await.unwrap();

    assert!(succeeded(&sim, 0).await);
    let snapshot = sim.snapshot().await.unwrap();
    assert_eq!(snapshot.processes[0].frequency_epoch, 1);
    assert!(snapshot.elections[0].sent.is_empty());
    sim.shutdown().await;
}
