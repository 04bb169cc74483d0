//! Relay Circuit Simulation Library
//!
//! A headless simulation of relay interlocking circuits: which parts of a
//! wired network are live, and what the relays, turnouts and axle counters
//! they drive do in response.

pub mod simulation;
