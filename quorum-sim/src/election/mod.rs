// Election protocol: ballots, per-process state and the state machine.

pub mod messages;
pub mod node;
pub mod state;

pub use messages::{Ballot, BallotKind};
pub use node::{ElectionEvent, ElectionNode};
pub use state::{ProcessSnapshot, ProcessState, ProcessStateSnapshot};
