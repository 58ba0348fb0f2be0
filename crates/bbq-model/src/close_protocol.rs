//! State machine of the queue's close protocol.
//!
//! Each producer performs one `put`, each consumer one `take`, and a
//! single closer performs one `close`. Every critical section under the
//! queue mutex is one atomic step; a semaphore acquire is enabled only
//! while a permit is available; a barrier wait is enabled only once every
//! party has arrived.
//!
//! Two registration strategies are modelled:
//!
//! - `Locked`: a thread checks `is_open` and counts itself as a waiter in
//!   one critical section, and deregisters in the same critical section
//!   that mutates the ring.
//! - `Atomic`: the `is_open` check and the counter increment are separate
//!   steps, and deregistration happens after the permit release.
//!
//! `Atomic` lets `close` sample a waiter count that does not match the
//! threads that will arrive at its barrier, which the checker reports as
//! a deadlock or an overfull barrier.
//!
//! # Invariants
//!
//! | Property | Kind | Description |
//! |----------|------|-------------|
//! | BoundedCapacity | always | `len <= capacity` |
//! | NoUnderflow | always | no dequeue from an empty ring |
//! | NoAdmissionAfterClose | always | no enqueue once `is_open` is false |
//! | BarrierNeverOverfull | always | arrivals never exceed parties |
//! | NoDeadlock | always | a state with no enabled step has everyone finished |
//! | ProducerWokenByClose | sometimes | a blocked producer leaves through the barrier |
//! | ConsumerWokenByClose | sometimes | a blocked consumer leaves through the barrier |
//! | ItemDelivered | sometimes | a consumer receives an item |

use std::fmt;

use serde::{Deserialize, Serialize};
use stateright::{Model, Property};

/// How a thread counts itself as a waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Registration {
    /// Check and count under the queue mutex.
    Locked,
    /// Check, then count with a separate atomic increment.
    Atomic,
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Registration::Locked => f.write_str("locked"),
            Registration::Atomic => f.write_str("atomic"),
        }
    }
}

/// How a finished `put`/`take` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outcome {
    Succeeded,
    /// Saw the closed flag before blocking.
    Rejected,
    /// Blocked, then woken by `close` and released by its barrier.
    WokenByClose,
}

/// Program counter of a producer or consumer. Names the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pc {
    Start,
    /// `Atomic` only: the increment after the `is_open` check.
    Register,
    Acquire,
    Lock,
    Release,
    /// `Atomic` only: the decrement after the release.
    Deregister,
    Arrive,
    AwaitBarrier,
    Done(Outcome),
}

impl Pc {
    pub fn is_done(self) -> bool {
        matches!(self, Pc::Done(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CloserPc {
    Idle,
    ArriveProducers,
    AwaitProducers,
    ArriveConsumers,
    AwaitConsumers,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarrierState {
    pub parties: usize,
    pub arrived: usize,
}

impl BarrierState {
    fn is_complete(&self) -> bool {
        self.arrived >= self.parties
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Producer,
    Consumer,
}

/// Global state of one close-protocol execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CloseState {
    pub producers: Vec<Pc>,
    pub consumers: Vec<Pc>,
    pub closer: CloserPc,
    pub is_open: bool,
    pub len: usize,
    pub free_slots: usize,
    pub occupied_slots: usize,
    pub enq_waiters: usize,
    pub deq_waiters: usize,
    pub enq_barrier: Option<BarrierState>,
    pub deq_barrier: Option<BarrierState>,
    pub delivered: usize,
    pub admitted_after_close: usize,
    pub underflows: usize,
}

impl CloseState {
    pub fn all_done(&self) -> bool {
        self.closer == CloserPc::Done
            && self.producers.iter().all(|pc| pc.is_done())
            && self.consumers.iter().all(|pc| pc.is_done())
    }

    fn pcs_mut(&mut self, role: Role) -> &mut Vec<Pc> {
        match role {
            Role::Producer => &mut self.producers,
            Role::Consumer => &mut self.consumers,
        }
    }

    fn waiters_mut(&mut self, role: Role) -> &mut usize {
        match role {
            Role::Producer => &mut self.enq_waiters,
            Role::Consumer => &mut self.deq_waiters,
        }
    }

    /// Permits the role acquires before touching the ring.
    fn permits(&self, role: Role) -> usize {
        match role {
            Role::Producer => self.free_slots,
            Role::Consumer => self.occupied_slots,
        }
    }

    fn barrier(&self, role: Role) -> Option<BarrierState> {
        match role {
            Role::Producer => self.enq_barrier,
            Role::Consumer => self.deq_barrier,
        }
    }

    fn barrier_mut(&mut self, role: Role) -> &mut Option<BarrierState> {
        match role {
            Role::Producer => &mut self.enq_barrier,
            Role::Consumer => &mut self.deq_barrier,
        }
    }
}

/// One atomic step, tagged with the step it executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseAction {
    Producer(usize, Pc),
    Consumer(usize, Pc),
    Closer(CloserPc),
}

impl fmt::Display for CloseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseAction::Producer(id, pc) => write!(f, "producer {} {:?}", id, pc),
            CloseAction::Consumer(id, pc) => write!(f, "consumer {} {:?}", id, pc),
            CloseAction::Closer(pc) => write!(f, "closer {:?}", pc),
        }
    }
}

/// Names of the properties that must hold in every reachable state.
pub const SAFETY_PROPERTIES: [&str; 5] = [
    "BoundedCapacity",
    "NoUnderflow",
    "NoAdmissionAfterClose",
    "BarrierNeverOverfull",
    "NoDeadlock",
];

/// Names of the properties that must be reachable in some state.
pub const REACHABILITY_PROPERTIES: [&str; 3] =
    ["ProducerWokenByClose", "ConsumerWokenByClose", "ItemDelivered"];

/// Stateright model of `put`/`take` racing one `close`.
#[derive(Debug, Clone)]
pub struct CloseProtocolModel {
    pub producers: usize,
    pub consumers: usize,
    pub capacity: usize,
    pub registration: Registration,
}

impl CloseProtocolModel {
    pub fn new(producers: usize, consumers: usize, capacity: usize, registration: Registration) -> Self {
        debug_assert!(capacity > 0, "capacity must be at least 1");
        Self {
            producers,
            consumers,
            capacity,
            registration,
        }
    }

    fn step_enabled(state: &CloseState, role: Role, pc: Pc) -> bool {
        match pc {
            Pc::Acquire => state.permits(role) > 0,
            Pc::AwaitBarrier => state.barrier(role).is_some_and(|b| b.is_complete()),
            Pc::Done(_) => false,
            _ => true,
        }
    }

    fn closer_enabled(state: &CloseState) -> bool {
        match state.closer {
            CloserPc::AwaitProducers => state.enq_barrier.is_some_and(|b| b.is_complete()),
            CloserPc::AwaitConsumers => state.deq_barrier.is_some_and(|b| b.is_complete()),
            CloserPc::Done => false,
            _ => true,
        }
    }

    fn step(&self, state: &mut CloseState, role: Role, id: usize, pc: Pc) {
        let locked = self.registration == Registration::Locked;
        let next = match pc {
            Pc::Start if !state.is_open => Pc::Done(Outcome::Rejected),
            Pc::Start if locked => {
                *state.waiters_mut(role) += 1;
                Pc::Acquire
            }
            Pc::Start => Pc::Register,
            Pc::Register => {
                *state.waiters_mut(role) += 1;
                Pc::Acquire
            }
            Pc::Acquire => {
                match role {
                    Role::Producer => state.free_slots -= 1,
                    Role::Consumer => state.occupied_slots -= 1,
                }
                Pc::Lock
            }
            Pc::Lock if !state.is_open => {
                let waiters = state.waiters_mut(role);
                *waiters = waiters.saturating_sub(1);
                Pc::Arrive
            }
            Pc::Lock => {
                match role {
                    Role::Producer => state.len += 1,
                    Role::Consumer if state.len == 0 => state.underflows += 1,
                    Role::Consumer => {
                        state.len -= 1;
                        state.delivered += 1;
                    }
                }
                if locked {
                    let waiters = state.waiters_mut(role);
                    *waiters = waiters.saturating_sub(1);
                }
                Pc::Release
            }
            Pc::Release => {
                match role {
                    Role::Producer => state.occupied_slots += 1,
                    Role::Consumer => state.free_slots += 1,
                }
                if locked {
                    Pc::Done(Outcome::Succeeded)
                } else {
                    Pc::Deregister
                }
            }
            Pc::Deregister => {
                let waiters = state.waiters_mut(role);
                *waiters = waiters.saturating_sub(1);
                Pc::Done(Outcome::Succeeded)
            }
            Pc::Arrive => {
                if let Some(barrier) = state.barrier_mut(role) {
                    barrier.arrived += 1;
                }
                Pc::AwaitBarrier
            }
            Pc::AwaitBarrier => Pc::Done(Outcome::WokenByClose),
            Pc::Done(outcome) => Pc::Done(outcome),
        };
        state.pcs_mut(role)[id] = next;
    }

    fn closer_step(state: &mut CloseState) {
        state.closer = match state.closer {
            CloserPc::Idle => {
                state.is_open = false;
                let producers = state.enq_waiters;
                let consumers = state.deq_waiters;
                state.enq_barrier = Some(BarrierState {
                    parties: producers + 1,
                    arrived: 0,
                });
                state.deq_barrier = Some(BarrierState {
                    parties: consumers + 1,
                    arrived: 0,
                });
                state.free_slots += producers;
                state.occupied_slots += consumers;
                CloserPc::ArriveProducers
            }
            CloserPc::ArriveProducers => {
                if let Some(barrier) = state.enq_barrier.as_mut() {
                    barrier.arrived += 1;
                }
                CloserPc::AwaitProducers
            }
            CloserPc::AwaitProducers => CloserPc::ArriveConsumers,
            CloserPc::ArriveConsumers => {
                if let Some(barrier) = state.deq_barrier.as_mut() {
                    barrier.arrived += 1;
                }
                CloserPc::AwaitConsumers
            }
            CloserPc::AwaitConsumers | CloserPc::Done => CloserPc::Done,
        };
    }
}

impl Model for CloseProtocolModel {
    type State = CloseState;
    type Action = CloseAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![CloseState {
            producers: vec![Pc::Start; self.producers],
            consumers: vec![Pc::Start; self.consumers],
            closer: CloserPc::Idle,
            is_open: true,
            len: 0,
            free_slots: self.capacity,
            occupied_slots: 0,
            enq_waiters: 0,
            deq_waiters: 0,
            enq_barrier: None,
            deq_barrier: None,
            delivered: 0,
            admitted_after_close: 0,
            underflows: 0,
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for (id, &pc) in state.producers.iter().enumerate() {
            if Self::step_enabled(state, Role::Producer, pc) {
                actions.push(CloseAction::Producer(id, pc));
            }
        }
        for (id, &pc) in state.consumers.iter().enumerate() {
            if Self::step_enabled(state, Role::Consumer, pc) {
                actions.push(CloseAction::Consumer(id, pc));
            }
        }
        if Self::closer_enabled(state) {
            actions.push(CloseAction::Closer(state.closer));
        }
    }

    fn next_state(&self, last_state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut state = last_state.clone();
        match action {
            CloseAction::Producer(id, pc) => {
                let was_open = state.is_open;
                self.step(&mut state, Role::Producer, id, pc);
                if pc == Pc::Lock && !was_open && state.len > last_state.len {
                    state.admitted_after_close += 1;
                }
            }
            CloseAction::Consumer(id, pc) => self.step(&mut state, Role::Consumer, id, pc),
            CloseAction::Closer(_) => Self::closer_step(&mut state),
        }
        Some(state)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("BoundedCapacity", |model: &Self, state: &CloseState| {
                state.len <= model.capacity
            }),
            Property::always("NoUnderflow", |_: &Self, state: &CloseState| state.underflows == 0),
            Property::always("NoAdmissionAfterClose", |_: &Self, state: &CloseState| {
                state.admitted_after_close == 0
            }),
            Property::always("BarrierNeverOverfull", |_: &Self, state: &CloseState| {
                [state.enq_barrier, state.deq_barrier]
                    .iter()
                    .flatten()
                    .all(|b| b.arrived <= b.parties)
            }),
            Property::always("NoDeadlock", |model: &Self, state: &CloseState| {
                let mut actions = Vec::new();
                model.actions(state, &mut actions);
                !actions.is_empty() || state.all_done()
            }),
            Property::sometimes("ProducerWokenByClose", |_: &Self, state: &CloseState| {
                state.producers.contains(&Pc::Done(Outcome::WokenByClose))
            }),
            Property::sometimes("ConsumerWokenByClose", |_: &Self, state: &CloseState| {
                state.consumers.contains(&Pc::Done(Outcome::WokenByClose))
            }),
            Property::sometimes("ItemDelivered", |_: &Self, state: &CloseState| {
                state.delivered > 0
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateright::Checker;

    fn model(registration: Registration) -> CloseProtocolModel {
        CloseProtocolModel::new(2, 2, 1, registration)
    }

    #[test]
    fn test_initial_state() {
        let states = model(Registration::Locked).init_states();
        assert_eq!(states.len(), 1);
        let state = &states[0];
        assert!(state.is_open);
        assert_eq!(state.free_slots, 1);
        assert_eq!(state.producers, vec![Pc::Start, Pc::Start]);
        assert!(!state.all_done());
    }

    #[test]
    fn test_close_sizes_barriers_from_waiters() {
        let model = model(Registration::Locked);
        let mut state = model.init_states().remove(0);
        state = model
            .next_state(&state, CloseAction::Producer(0, Pc::Start))
            .unwrap();
        assert_eq!(state.enq_waiters, 1);

        state = model.next_state(&state, CloseAction::Closer(CloserPc::Idle)).unwrap();
        assert!(!state.is_open);
        assert_eq!(
            state.enq_barrier,
            Some(BarrierState {
                parties: 2,
                arrived: 0
            })
        );
        assert_eq!(state.deq_barrier.map(|b| b.parties), Some(1));
        // One force-released permit on top of the real free slot.
        assert_eq!(state.free_slots, 2);
    }

    #[test]
    fn test_consumer_blocks_on_empty_queue() {
        let model = model(Registration::Locked);
        let mut state = model.init_states().remove(0);
        state = model
            .next_state(&state, CloseAction::Consumer(0, Pc::Start))
            .unwrap();

        let mut actions = Vec::new();
        model.actions(&state, &mut actions);
        assert!(!actions.contains(&CloseAction::Consumer(0, Pc::Acquire)));
    }

    #[test]
    fn test_locked_registration_holds() {
        let checker = model(Registration::Locked).checker().spawn_bfs().join();
        for name in SAFETY_PROPERTIES {
            assert!(
                checker.discovery(name).is_none(),
                "{} violated with locked registration",
                name
            );
        }
        for name in REACHABILITY_PROPERTIES {
            assert!(checker.discovery(name).is_some(), "{} never reached", name);
        }
    }

    #[test]
    fn test_atomic_registration_fails() {
        let checker = model(Registration::Atomic).checker().spawn_bfs().join();
        let violated: Vec<_> = SAFETY_PROPERTIES
            .into_iter()
            .filter(|name| checker.discovery(*name).is_some())
            .collect();
        assert!(
            violated.contains(&"BarrierNeverOverfull") || violated.contains(&"NoDeadlock"),
            "atomic registration should break the close barrier, got {:?}",
            violated
        );
        // The ring itself stays consistent.
        assert!(checker.discovery("BoundedCapacity").is_none());
        assert!(checker.discovery("NoUnderflow").is_none());
    }
}
