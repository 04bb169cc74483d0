//! Single-threaded timer queue
//!
//! Timers are keyed: scheduling a key that is already pending replaces the
//! earlier timer, and cancelling a key drops it. Due timers pop in time
//! order, ties in scheduling order.

use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, HashMap};

use super::types::{NodeId, ObjectId};

/// What a timer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Command node delayed action or retry
    Command(NodeId),
    /// Delayed delivery of a coil's power change to its relay
    RelayCoil(NodeId, usize),
    TurnoutMotor(ObjectId),
    /// Next step of an axle counter reset sequence
    AxleReset(ObjectId),
    LeverSpring(ObjectId),
    ButtonRelease(ObjectId),
}

/// A fired timer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerEvent {
    pub key: TimerKey,
    pub due: f32,
    /// Coil power carried by a delayed relay coil timer
    pub powered: bool,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BTreeMap<(OrderedFloat<f32>, u64), (TimerKey, bool)>,
    pending: HashMap<TimerKey, (OrderedFloat<f32>, u64)>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `key` at `due`, replacing any pending timer with that key
    pub fn schedule(&mut self, key: TimerKey, due: f32) {
        self.schedule_with(key, due, false);
    }

    pub fn schedule_with(&mut self, key: TimerKey, due: f32, powered: bool) {
        self.cancel(key);
        let slot = (OrderedFloat(due), self.next_seq);
        self.next_seq += 1;
        self.queue.insert(slot, (key, powered));
        self.pending.insert(key, slot);
    }

    /// Drops a pending timer. Returns true if one was pending.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        match self.pending.remove(&key) {
            Some(slot) => {
                self.queue.remove(&slot);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: TimerKey) -> bool {
        self.pending.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Time of the earliest pending timer
    pub fn next_due(&self) -> Option<f32> {
        self.queue.keys().next().map(|(due, _)| due.0)
    }

    /// Removes and returns the earliest timer due at or before `now`
    pub fn pop_due(&mut self, now: f32) -> Option<TimerEvent> {
        let (&slot, _) = self.queue.iter().next()?;
        if slot.0 > OrderedFloat(now) {
            return None;
        }
        let (key, powered) = self.queue.remove(&slot)?;
        self.pending.remove(&key);
        Some(TimerEvent {
            key,
            due: slot.0 .0,
            powered,
        })
    }

    /// Cancels every timer matching a predicate
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&TimerKey) -> bool) {
        let keys: Vec<TimerKey> = self.pending.keys().filter(|k| pred(k)).copied().collect();
        for key in keys {
            self.cancel(key);
        }
    }
}
