// quorum-sim/src/simulation/network.rs
//
// Per-link fault configuration shared by the router, the processes and the
// admin surface. One RwLock guards the whole matrix: every cell holds lag and
// loss together, so a reader never sees a pair half-updated.

use crate::data_structures::{Partition, ProcessId};
use crate::error::{SimResult, SimulationError};
use crate::network::LinkConditions;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Mesh {
    // Row-major: links[from * size + to]
    links: Vec<LinkConditions>,
    partition: Option<Partition>,
}

#[derive(Debug)]
pub struct NetworkState {
    size: usize,
    mesh: RwLock<Mesh>,
}

/// Copy of the whole mesh, for snapshots and comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub cluster_size: usize,
    // lag_ms[from][to]
    pub lag_ms: Vec<Vec<u64>>,
    // packet_loss[from][to], percent
    pub packet_loss: Vec<Vec<u8>>,
    pub partition: Option<Partition>,
}

impl NetworkState {
    /// A healthy mesh: zero lag and zero loss everywhere.
    pub fn new_healthy(size: usize) -> Self {
        NetworkState {
            size,
            mesh: RwLock::new(Mesh {
                links: vec![LinkConditions::HEALTHY; size * size],
                partition: None,
            }),
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.size
    }

    fn read(&self) -> RwLockReadGuard<'_, Mesh> {
        self.mesh.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Mesh> {
        self.mesh.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_id(&self, id: ProcessId) -> SimResult<()> {
        if id < self.size {
            Ok(())
        } else {
            Err(SimulationError::InvalidProcessId { id, cluster_size: self.size })
        }
    }

    fn index(&self, from: ProcessId, to: ProcessId) -> usize {
        from * self.size + to
    }

    /// Conditions of the directed link `from -> to`. Unknown ids read as
    /// a severed link.
    pub fn link(&self, from: ProcessId, to: ProcessId) -> LinkConditions {
        if from >= self.size || to >= self.size {
            return LinkConditions::SEVERED;
        }
        self.read().links[self.index(from, to)]
    }

    pub fn set_lag(&self, from: ProcessId, to: ProcessId, lag: Duration) -> SimResult<()> {
        self.check_id(from)?;
        self.check_id(to)?;
        let idx = self.index(from, to);
        self.write().links[idx].lag = lag;
        debug!("[Network] Lag {} -> {} set to {:?}", from, to, lag);
        Ok(())
    }

    pub fn set_lag_symmetric(&self, a: ProcessId, b: ProcessId, lag: Duration) -> SimResult<()> {
        self.check_id(a)?;
        self.check_id(b)?;
        let (ab, ba) = (self.index(a, b), self.index(b, a));
        let mut mesh = self.write();
        mesh.links[ab].lag = lag;
        mesh.links[ba].lag = lag;
        debug!("[Network] Lag {} <-> {} set to {:?}", a, b, lag);
        Ok(())
    }

    pub fn set_packet_loss(&self, from: ProcessId, to: ProcessId, percent: u8) -> SimResult<()> {
        self.check_id(from)?;
        self.check_id(to)?;
        if percent > 100 {
            return Err(SimulationError::InvalidInput(format!(
                "packet loss must be between 0 and 100, got {}", percent
            )));
        }
        let idx = self.index(from, to);
        self.write().links[idx].packet_loss = percent;
        debug!("[Network] Packet loss {} -> {} set to {}%", from, to, percent);
        Ok(())
    }

    /// Severs every link between `left` and `right`, in both directions.
    ///
    /// The two sides must be disjoint and together name every process
    /// exactly once; otherwise nothing is changed.
    pub fn partition(&self, left: &[ProcessId], right: &[ProcessId]) -> SimResult<()> {
        for &id in left.iter().chain(right) {
            self.check_id(id)?;
        }
        let mut seen = HashSet::with_capacity(self.size);
        let all_unique = left.iter().chain(right).all(|id| seen.insert(*id));
        if !all_unique || seen.len() != self.size {
            return Err(SimulationError::PartitionCoverageError {
                left: left.to_vec(),
                right: right.to_vec(),
            });
        }

        let mut mesh = self.write();
        for &l in left {
            for &r in right {
                let (lr, rl) = (self.index(l, r), self.index(r, l));
                mesh.links[lr].packet_loss = 100;
                mesh.links[rl].packet_loss = 100;
            }
        }
        mesh.partition = Some(Partition { left: left.to_vec(), right: right.to_vec() });
        info!("[Network] Split network. Left: {:?} Right: {:?}", left, right);
        Ok(())
    }

    /// Resets every link to healthy and forgets the partition.
    pub fn heal(&self) {
        let mut mesh = self.write();
        mesh.links.iter_mut().for_each(|link| *link = LinkConditions::HEALTHY);
        mesh.partition = None;
        info!("[Network] Healed all links");
    }

    pub fn partition_state(&self) -> Option<Partition> {
        self.read().partition.clone()
    }

    /// `lag[from][to]`
    pub fn lag_matrix(&self) -> Vec<Vec<Duration>> {
        let mesh = self.read();
        mesh.links
            .chunks(self.size.max(1))
            .map(|row| row.iter().map(|l| l.lag).collect())
            .collect()
    }

    /// `packet_loss[from][to]` in percent
    pub fn loss_matrix(&self) -> Vec<Vec<u8>> {
        self.snapshot().packet_loss
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        let mesh = self.read();
        let width = self.size.max(1);
        let lag_ms = mesh
            .links
            .chunks(width)
            .map(|row| row.iter().map(|l| u64::try_from(l.lag.as_millis()).unwrap_or(u64::MAX)).collect())
            .collect();
        let packet_loss = mesh
            .links
            .chunks(width)
            .map(|row| row.iter().map(|l| l.packet_loss).collect())
            .collect();
        NetworkSnapshot {
            cluster_size: self.size,
            lag_ms,
            packet_loss,
            partition: mesh.partition.clone(),
        }
    }

    /// Lag matrix in milliseconds as CSV, one row per sender. This is the
    /// input of the heat-map plot.
    pub fn lag_matrix_csv(&self) -> String {
        let snapshot = self.snapshot();
        let mut csv = String::from("from");
        for to in 0..self.size {
            let _ = write!(csv, ",to_{}", to);
        }
        csv.push('\n');
        for (from, row) in snapshot.lag_ms.iter().enumerate() {
            let _ = write!(csv, "{}", from);
            for lag in row {
                let _ = write!(csv, ",{}", lag);
            }
            csv.push('\n');
        }
        csv
    }
}
