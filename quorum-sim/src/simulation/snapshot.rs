// Read-only view of a running simulation, handed to renderers.

use crate::election::state::ProcessSnapshot;
use crate::error::{SimResult, SimulationError};
use crate::history::ElectionRecordSnapshot;
use crate::simulation::network::NetworkSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub processes: Vec<ProcessSnapshot>,
    pub elections: Vec<ElectionRecordSnapshot>,
    pub network: NetworkSnapshot,
}

impl SimulationSnapshot {
    pub fn to_json(&self) -> SimResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SimulationError::InvalidInput(format!("snapshot serialization failed: {}", e)))
    }

    pub fn successful_elections(&self) -> impl Iterator<Item = &ElectionRecordSnapshot> {
        self.elections.iter().filter(|e| e.successful)
    }

    /// One line per process, for terminal output.
    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self
            .processes
            .iter()
            .map(|p| {
                let frequency = p.frequency.map_or_else(|| "unknown".to_string(), |f| f.to_string());
                format!(
                    "process {}: {:?} epoch={} frequency={} frequency_epoch={} last_vote={}",
                    p.id, p.role, p.current_epoch, frequency, p.frequency_epoch, p.last_vote_epoch
                )
            })
            .collect();
        lines.push(format!(
            "elections: {} total, {} successful",
            self.elections.len(),
            self.successful_elections().count()
        ));
        if let Some(partition) = &self.network.partition {
            lines.push(format!("partition: {:?} | {:?}", partition.left, partition.right));
        }
        lines.join("\n")
    }
}
