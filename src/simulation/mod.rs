//! Relay circuit simulation
//!
//! Nodes joined by cables form circuits from power sources. This module
//! keeps those circuits consistent as node state changes and drives the
//! relays, levers, buttons, axle counters and turnouts the nodes are bound
//! to. It runs headless and can be tested from the console.

mod bridge;
mod cable;
mod circuit;
mod layout;
mod network;
mod node;
mod objects;
mod propagation;
mod routing;
mod scheduler;
mod types;
mod world;

// Re-export public types for external use
// These may not be used within this crate but are part of the public API
#[allow(unused_imports)]
pub use bridge::{RemoteBridge, SimulatorMessage, ACCESSORY_STATE_NORMAL, ACCESSORY_STATE_REVERSE};
#[allow(unused_imports)]
pub use cable::SimCable;
#[allow(unused_imports)]
pub use circuit::{CableItem, Circuit, CircuitItem, NodeItem};
#[allow(unused_imports)]
pub use layout::{CableRecord, LayoutFile, NodeRecord, ObjectRecord};
#[allow(unused_imports)]
pub use network::SimCircuitNetwork;
#[allow(unused_imports)]
pub use node::{NodeContact, NodePower, SimNode};
#[allow(unused_imports)]
pub use objects::{
    AxleCounter, AxleCounterState, AxleSensor, Button, ButtonState, Lever, ObjectKind, Relay, RelayState,
    SimObject, Turnout, TurnoutPosition,
};
#[allow(unused_imports)]
pub use routing::{
    AxleCounterNode, CoilPolarity, CommandNode, CommandPhase, ContactSelection, ContactType, DeviatorControl,
    DeviatorNode, NodeKind, RelayCoilNode, AXLE_FREE_TRACK_OUT, AXLE_OCCUPIED_TRACK_OUT, AXLE_POWER_IN,
    AXLE_RESET_IN, DEVIATOR_COMMON, DEVIATOR_DOWN, DEVIATOR_UP, DIODE_ANODE, DIODE_CATHODE, TURNOUT_N, TURNOUT_R,
};
#[allow(unused_imports)]
pub use scheduler::{Scheduler, TimerEvent, TimerKey};
#[allow(unused_imports)]
pub use types::{
    AnyCircuitType, CableEnd, CableId, CableSide, CircuitId, CircuitPole, CircuitType, NodeId, ObjectId, SimId,
    Terminal, AXLE_COUNTER_RESET_PRE_TIME, AXLE_COUNTER_RESET_TIME, COMMAND_DEFAULT_DELAY, COMMAND_RETRY_DELAY,
    MAX_SETTLE_STEPS, MAX_TRAVERSAL_DEPTH, TURNOUT_DEFAULT_MOTOR_TIME,
};
pub use world::{ObjectMessage, SimWorld, WorldTask};
