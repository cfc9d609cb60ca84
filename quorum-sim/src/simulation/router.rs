// quorum-sim/src/simulation/router.rs
//
// The only path from the shared outbound channel to a process inbox.
// Drop and lag are decided here from the live NetworkState; delayed
// deliveries wait in a FuturesUnordered owned by the router task, so one
// slow link never holds up the others.

use crate::config::RouterMode;
use crate::network::NetworkMessage;
use crate::simulation::network::NetworkState;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use log::{debug, info, warn};
use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Counters returned when the router stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    // Taken off the outbound channel
    pub routed: usize,
    pub dropped: usize,
    // Addressed to a process that does not exist (also counted in dropped)
    pub unroutable: usize,
    // Held back for a nonzero lag
    pub delayed: usize,
    // Pushed into an inbox
    pub delivered: usize,
}

pub struct Router {
    outbound_rx: mpsc::Receiver<NetworkMessage>,
    inboxes: Vec<mpsc::UnboundedSender<NetworkMessage>>,
    network: Arc<NetworkState>,
    mode: RouterMode,
    rng: SmallRng,
    stats: RouterStats,
}

impl Router {
    pub fn new(
        outbound_rx: mpsc::Receiver<NetworkMessage>,
        inboxes: Vec<mpsc::UnboundedSender<NetworkMessage>>,
        network: Arc<NetworkState>,
        mode: RouterMode,
        rng: SmallRng,
    ) -> Self {
        Router { outbound_rx, inboxes, network, mode, rng, stats: RouterStats::default() }
    }

    /// Routes until the outbound channel closes (unbounded) or `n` messages
    /// were taken (bounded), then flushes pending deliveries.
    pub async fn run(mut self) -> RouterStats {
        info!("[Router] Starting ({:?}, {} inboxes)", self.mode, self.inboxes.len());
        let limit = match self.mode {
            RouterMode::Unbounded => None,
            RouterMode::Bounded(n) => Some(n),
        };
        let mut in_flight = FuturesUnordered::new();

        loop {
            if limit.is_some_and(|n| self.stats.routed >= n) {
                break;
            }
            tokio::select! {
                maybe_msg = self.outbound_rx.recv() => {
                    let Some(msg) = maybe_msg else {
                        debug!("[Router] Outbound channel closed");
                        break;
                    };
                    self.stats.routed += 1;
                    if msg.receiver >= self.inboxes.len() {
                        warn!("[Router] No process {}, dropping message from {}", msg.receiver, msg.sender);
                        self.stats.dropped += 1;
                        self.stats.unroutable += 1;
                        continue;
                    }
                    let link = self.network.link(msg.sender, msg.receiver);
                    // uniform 0..100 below the loss percentage drops
                    if self.rng.gen_range(0u8..100) < link.packet_loss {
                        self.stats.dropped += 1;
                        debug!("[Router] Dropped {:?} {} -> {} (loss {}%)",
                            msg.ballot.kind, msg.sender, msg.receiver, link.packet_loss);
                        continue;
                    }
                    if link.lag.is_zero() {
                        self.deliver(msg);
                    } else {
                        self.stats.delayed += 1;
                        debug!("[Router] Delaying {:?} {} -> {} by {:?}",
                            msg.ballot.kind, msg.sender, msg.receiver, link.lag);
                        in_flight.push(sleep(link.lag).map(move |_| msg));
                    }
                }
                Some(msg) = in_flight.next(), if !in_flight.is_empty() => {
                    self.deliver(msg);
                }
            }
        }

        while let Some(msg) = in_flight.next().await {
            self.deliver(msg);
        }
        info!("[Router] Stopped: {:?}", self.stats);
        self.stats
    }

    fn deliver(&mut self, msg: NetworkMessage) {
        let (sender, receiver) = (msg.sender, msg.receiver);
        let Some(inbox) = self.inboxes.get(receiver) else {
            return;
        };
        if inbox.send(msg).is_err() {
            warn!("[Router] Process {} stopped, dropping message from {}", receiver, sender);
            self.stats.dropped += 1;
        } else {
            self.stats.delivered += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::messages::Ballot;
    use crate::network::LinkConditions;
    use rand::SeedableRng;
    use std::time::Duration;
    use tokio::time::Instant;

    struct Harness {
        outbound_tx: mpsc::Sender<NetworkMessage>,
        inboxes: Vec<mpsc::UnboundedReceiver<NetworkMessage>>,
        network: Arc<NetworkState>,
        router: Router,
    }

    fn harness(size: usize, mode: RouterMode) -> Harness {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (txs, rxs): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::unbounded_channel()).unzip();
        let network = Arc::new(NetworkState::new_healthy(size));
        let router = Router::new(outbound_rx, txs, Arc::clone(&network), mode, SmallRng::seed_from_u64(7));
        Harness { outbound_tx, inboxes: rxs, network, router }
    }

    fn heartbeat(from: usize, to: usize, epoch: u64) -> NetworkMessage {
        NetworkMessage {
            sender: from,
            receiver: to,
            ballot: Ballot::heartbeat(epoch, None, 0),
            link: LinkConditions::HEALTHY,
        }
    }

    #[tokio::test]
    async fn full_loss_drops_everything() {
        let mut h = harness(2, RouterMode::Bounded(20));
        h.network.set_packet_loss(0, 1, 100).unwrap();
        for epoch in 0..20 {
            h.outbound_tx.send(heartbeat(0, 1, epoch)).await.unwrap();
        }
        let stats = h.router.run().await;
        assert_eq!(stats, RouterStats { routed: 20, dropped: 20, unroutable: 0, delayed: 0, delivered: 0 });
        assert!(h.inboxes[1].try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn lag_delays_delivery() {
        let mut h = harness(2, RouterMode::Bounded(1));
        h.network.set_lag(0, 1, Duration::from_millis(50)).unwrap();
        h.outbound_tx.send(heartbeat(0, 1, 3)).await.unwrap();

        let started = Instant::now();
        let stats = h.router.run().await;
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(h.inboxes[1].try_recv().unwrap().ballot.epoch, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_link_does_not_block_fast_one() {
        let mut h = harness(3, RouterMode::Bounded(2));
        h.network.set_lag(0, 2, Duration::from_millis(100)).unwrap();
        h.outbound_tx.send(heartbeat(0, 2, 1)).await.unwrap();
        h.outbound_tx.send(heartbeat(1, 2, 2)).await.unwrap();
        h.router.run().await;

        // reordered: the lag-free message overtakes
        assert_eq!(h.inboxes[2].try_recv().unwrap().sender, 1);
        assert_eq!(h.inboxes[2].try_recv().unwrap().sender, 0);
    }

    #[tokio::test]
    async fn unknown_receiver_is_dropped() {
        let mut h = harness(2, RouterMode::Bounded(1));
        h.outbound_tx.send(heartbeat(0, 5, 1)).await.unwrap();
        let stats = h.router.run().await;
        assert_eq!(stats.dropped, 1);
        // rejected before the loss draw, not treated as a severed link
        assert_eq!(stats.unroutable, 1);
        assert!(h.inboxes[0].try_recv().is_err());
        assert!(h.inboxes[1].try_recv().is_err());
    }

    #[tokio::test]
    async fn unbounded_stops_when_senders_close() {
        let mut h = harness(2, RouterMode::Unbounded);
        h.outbound_tx.send(heartbeat(1, 0, 1)).await.unwrap();
        drop(h.outbound_tx);
        let stats = h.router.run().await;
        assert_eq!(stats.routed, 1);
        assert_eq!(stats.delivered, 1);
        assert!(h.inboxes[0].try_recv().is_ok());
    }
}
