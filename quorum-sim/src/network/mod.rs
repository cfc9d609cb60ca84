// Network envelope and the outbound seam between processes and the router.

use crate::data_structures::ProcessId;
use crate::election::messages::Ballot;
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Properties of one directed link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConditions {
    #[serde(with = "humantime_serde")]
    pub lag: Duration,
    // 0 drops nothing, 100 drops everything
    pub packet_loss: u8,
}

impl LinkConditions {
    pub const HEALTHY: LinkConditions = LinkConditions { lag: Duration::ZERO, packet_loss: 0 };
    pub const SEVERED: LinkConditions = LinkConditions { lag: Duration::ZERO, packet_loss: 100 };
}

/// A ballot in flight between two processes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMessage {
    pub sender: ProcessId,
    pub receiver: ProcessId,
    pub ballot: Ballot,
    // Link conditions sampled when the sender enqueued the ballot
    pub link: LinkConditions,
}

/// Where processes hand their outbound messages.
#[async_trait]
pub trait NetworkInterface: Send + Sync {
    async fn send_message(&self, msg: NetworkMessage);
}

/// The shared outbound channel drained by the router.
#[derive(Clone, Debug)]
pub struct OutboundChannel {
    tx: mpsc::Sender<NetworkMessage>,
}

impl OutboundChannel {
    pub fn new(tx: mpsc::Sender<NetworkMessage>) -> Self {
        OutboundChannel { tx }
    }
}

#[async_trait]
impl NetworkInterface for OutboundChannel {
    async fn send_message(&self, msg: NetworkMessage) {
        let (sender, receiver) = (msg.sender, msg.receiver);
        if self.tx.send(msg).await.is_err() {
            // Router is gone; best-effort network, nothing to report upstream.
            warn!("[Outbound] Router closed, dropping message {} -> {}", sender, receiver);
        }
    }
}

/// Captures everything sent through it. Used by state-machine tests and
/// anything that wants to inspect traffic without a router.
#[derive(Clone, Debug, Default)]
pub struct RecordingNetwork {
    sent: Arc<Mutex<Vec<NetworkMessage>>>,
}

impl RecordingNetwork {
    pub fn new() -> Self {
        Default::default()
    }

    /// Removes and returns everything captured so far.
    pub fn take(&self) -> Vec<NetworkMessage> {
        let mut sent = self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *sent)
    }
}

#[async_trait]
impl NetworkInterface for RecordingNetwork {
    async fn send_message(&self, msg: NetworkMessage) {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(msg);
    }
}
