//! Core types for the relay circuit simulation
//!
//! Ids, poles and circuit classifications shared by every other module.

use serde::{Deserialize, Serialize};
use std::ops::Not;

/// A unique identifier for simulation entities
/// This is a simple wrapper around a usize for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimId(pub usize);

/// A wrapper type for circuit node IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub SimId);

/// A wrapper type for cable IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CableId(pub SimId);

/// A wrapper type for circuit IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CircuitId(pub SimId);

/// A wrapper type for simulation object IDs (relays, levers, axle counters...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub SimId);

/// One of the two conductors carried by every cable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CircuitPole {
    First,
    Second,
}

impl CircuitPole {
    pub const BOTH: [CircuitPole; 2] = [CircuitPole::First, CircuitPole::Second];

    pub fn index(self) -> usize {
        match self {
            CircuitPole::First => 0,
            CircuitPole::Second => 1,
        }
    }
}

impl Not for CircuitPole {
    type Output = CircuitPole;

    fn not(self) -> CircuitPole {
        match self {
            CircuitPole::First => CircuitPole::Second,
            CircuitPole::Second => CircuitPole::First,
        }
    }
}

/// Whether a circuit is a continuous powered path or a partial one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CircuitType {
    /// Partially explored path kept for incremental maintenance
    Open,
    /// Continuous path from source back to source
    Closed,
}

impl CircuitType {
    pub const BOTH: [CircuitType; 2] = [CircuitType::Open, CircuitType::Closed];

    pub fn index(self) -> usize {
        match self {
            CircuitType::Open => 0,
            CircuitType::Closed => 1,
        }
    }
}

/// Summary of which circuit types are present at a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AnyCircuitType {
    #[default]
    None,
    Open,
    Closed,
    Both,
}

impl AnyCircuitType {
    pub fn from_presence(open: bool, closed: bool) -> Self {
        match (open, closed) {
            (false, false) => AnyCircuitType::None,
            (true, false) => AnyCircuitType::Open,
            (false, true) => AnyCircuitType::Closed,
            (true, true) => AnyCircuitType::Both,
        }
    }

    pub fn has_closed(self) -> bool {
        matches!(self, AnyCircuitType::Closed | AnyCircuitType::Both)
    }

    pub fn has_open(self) -> bool {
        matches!(self, AnyCircuitType::Open | AnyCircuitType::Both)
    }
}

/// The two ends of a cable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CableSide {
    A,
    B,
}

impl CableSide {
    pub fn index(self) -> usize {
        match self {
            CableSide::A => 0,
            CableSide::B => 1,
        }
    }
}

impl Not for CableSide {
    type Output = CableSide;

    fn not(self) -> CableSide {
        match self {
            CableSide::A => CableSide::B,
            CableSide::B => CableSide::A,
        }
    }
}

/// The node contact a cable end is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CableEnd {
    pub node: NodeId,
    pub contact: usize,
}

/// A connection point: which cable side is bound to which node contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Terminal {
    pub node: NodeId,
    pub contact: usize,
    pub cable: CableId,
    pub side: CableSide,
}

/// Recursion bound for a single traversal branch
pub const MAX_TRAVERSAL_DEPTH: usize = 1000;

/// Upper bound of tasks and messages drained by one settle pass
pub const MAX_SETTLE_STEPS: usize = 10_000;

/// Default delay before a command node performs its action, in seconds
pub const COMMAND_DEFAULT_DELAY: f32 = 0.5;

/// Delay before a failed command action is retried, in seconds
pub const COMMAND_RETRY_DELAY: f32 = 1.0;

/// Time spent by an axle counter in the pre-reset phase, in seconds
pub const AXLE_COUNTER_RESET_PRE_TIME: f32 = 3.0;

/// Time spent by an axle counter in the reset phase, in seconds
pub const AXLE_COUNTER_RESET_TIME: f32 = 10.0;

/// Default turnout motor travel time, in seconds
pub const TURNOUT_DEFAULT_MOTOR_TIME: f32 = 1.5;
