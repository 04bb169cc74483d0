//! Cables joining two node contacts
//!
//! A cable carries two conductors (poles). Each end is optionally attached
//! to a node contact; a cable with both ends free is destroyed by the network.

use log::warn;

use super::types::{AnyCircuitType, CableEnd, CableId, CableSide, CircuitPole, CircuitType};

/// A cable in the circuit network
#[derive(Debug, Clone)]
pub struct SimCable {
    pub id: CableId,
    ends: [Option<CableEnd>; 2],
    /// Circuit occurrences per [type][pole]
    power: [[u32; 2]; 2],
}

impl SimCable {
    pub fn new(id: CableId) -> Self {
        Self {
            id,
            ends: [None, None],
            power: [[0; 2]; 2],
        }
    }

    /// Gets the node contact attached on the given side
    pub fn end(&self, side: CableSide) -> Option<CableEnd> {
        self.ends[side.index()]
    }

    pub fn ends(&self) -> [Option<CableEnd>; 2] {
        self.ends
    }

    pub(super) fn set_end(&mut self, side: CableSide, end: Option<CableEnd>) {
        self.ends[side.index()] = end;
    }

    pub fn is_detached(&self) -> bool {
        self.ends.iter().all(Option::is_none)
    }

    /// Which side of this cable is attached to the given node contact
    pub fn side_of(&self, end: CableEnd) -> Option<CableSide> {
        [CableSide::A, CableSide::B]
            .into_iter()
            .find(|side| self.end(*side) == Some(end))
    }

    /// Summarized power on one conductor
    pub fn power(&self, pole: CircuitPole) -> AnyCircuitType {
        AnyCircuitType::from_presence(
            self.power[CircuitType::Open.index()][pole.index()] > 0,
            self.power[CircuitType::Closed.index()][pole.index()] > 0,
        )
    }

    pub fn has_circuits(&self, kind: CircuitType) -> bool {
        self.power[kind.index()].iter().any(|count| *count > 0)
    }

    pub(super) fn add_circuit(&mut self, kind: CircuitType, pole: CircuitPole) {
        let count = &mut self.power[kind.index()][pole.index()];
        match count.checked_add(1) {
            Some(next) => *count = next,
            None => warn!("Circuit counter on cable {:?} saturated", self.id),
        }
    }

    pub(super) fn remove_circuit(&mut self, kind: CircuitType, pole: CircuitPole) {
        let count = &mut self.power[kind.index()][pole.index()];
        debug_assert!(*count > 0, "cable circuit count underflow");
        *count = count.saturating_sub(1);
    }
}
