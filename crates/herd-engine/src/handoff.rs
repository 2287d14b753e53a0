//! Pending queue and ownership handoff between controller and workers.
//!
//! One mutex guards the queue, every slot's state tag, the per-slot
//! finished mailboxes and the shutdown flag as a single unit, so a worker
//! can never see a queued claim whose tag is stale and a waiter can never
//! miss a release between checking the tags and starting to wait.
//!
//! ```text
//! Controller                     Handoff                       Worker (N)
//!     |--dispatch(claims)-------->| slots[i] = Queued           |
//!     |                           | pending.push_back(claim)    |
//!     |                           |--work_added.notify_all()--->|
//!     |                           |<--------------------next()--|
//!     |                           | slots[i] = InFlight         |
//!     |                           |                       run() |
//!     |                           |<-----------release(claim)---|
//!     |                           | finished[i] = payload       |
//!     |                           | slots[i] = Idle             |
//!     |<--slot_released-----------|                             |
//!     |--wait_all() / wait_slot(i)|                             |
//! ```
//!
//! Claims carry the payload by value: while a slot is `Queued` or
//! `InFlight` the controller does not hold it, so concurrent access is
//! unrepresentable rather than merely forbidden.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Where a slot currently is in the handoff protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Held by the controller (or its result is waiting in the mailbox).
    Idle,
    /// In the pending queue, not yet picked up by a worker.
    Queued,
    /// Being processed by exactly one worker.
    InFlight,
}

impl SlotState {
    /// `true` for `Queued` and `InFlight`: the slot's step has not finished.
    pub fn is_awaiting(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// One unit of work: a payload bound to the slot it belongs to.
#[derive(Debug)]
pub(crate) struct Claim<T> {
    pub index: usize,
    pub payload: T,
}

/// Why [`Handoff::dispatch`] refused a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum HandoffError {
    /// The handoff is shutting down and accepts no new work.
    ShuttingDown,
    /// A claim names a slot outside `0..slot_count`.
    IndexOutOfRange { index: usize, slot_count: usize },
    /// A slot appears twice in the batch.
    Duplicate { index: usize },
    /// A slot is still queued or in flight.
    SlotBusy { index: usize },
    /// A slot's previous result has not been collected.
    Uncollected { index: usize },
}

impl fmt::Display for HandoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShuttingDown => write!(f, "handoff is shutting down"),
            Self::IndexOutOfRange { index, slot_count } => {
                write!(f, "slot {index} out of range (slot_count={slot_count})")
            }
            Self::Duplicate { index } => write!(f, "slot {index} dispatched twice"),
            Self::SlotBusy { index } => write!(f, "slot {index} is still awaiting its step"),
            Self::Uncollected { index } => {
                write!(f, "slot {index} has an uncollected result")
            }
        }
    }
}

struct QueueState<T> {
    pending: VecDeque<Claim<T>>,
    slots: Vec<SlotState>,
    finished: Vec<Option<T>>,
    shutdown: bool,
}

impl<T> QueueState<T> {
    fn any_awaiting(&self) -> bool {
        self.slots.iter().any(|s| s.is_awaiting())
    }
}

/// Mutex-guarded pending queue plus the two condition variables layered
/// on it: `work_added` (controller → workers) and `slot_released`
/// (workers → waiters).
pub(crate) struct Handoff<T> {
    state: Mutex<QueueState<T>>,
    work_added: Condvar,
    slot_released: Condvar,
}

impl<T> Handoff<T> {
    pub fn new(slot_count: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::with_capacity(slot_count),
                slots: vec![SlotState::Idle; slot_count],
                finished: (0..slot_count).map(|_| None).collect(),
                shutdown: false,
            }),
            work_added: Condvar::new(),
            slot_released: Condvar::new(),
        }
    }

    // Payload code never runs under the lock, so poisoning can only come
    // from a bug in this module; the state is still consistent then.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a batch, all or nothing.
    ///
    /// The whole batch is validated before any slot changes state; on
    /// refusal the claims are handed back untouched.
    pub fn dispatch(&self, claims: Vec<Claim<T>>) -> Result<(), (HandoffError, Vec<Claim<T>>)> {
        let mut state = self.lock();
        if let Err(e) = Self::check_batch(&state, &claims) {
            return Err((e, claims));
        }
        for claim in claims {
            state.slots[claim.index] = SlotState::Queued;
            state.pending.push_back(claim);
        }
        drop(state);
        self.work_added.notify_all();
        Ok(())
    }

    fn check_batch(state: &QueueState<T>, claims: &[Claim<T>]) -> Result<(), HandoffError> {
        if state.shutdown {
            return Err(HandoffError::ShuttingDown);
        }
        let slot_count = state.slots.len();
        let mut seen = vec![false; slot_count];
        for claim in claims {
            let index = claim.index;
            if index >= slot_count {
                return Err(HandoffError::IndexOutOfRange { index, slot_count });
            }
            if std::mem::replace(&mut seen[index], true) {
                return Err(HandoffError::Duplicate { index });
            }
            if state.slots[index].is_awaiting() {
                return Err(HandoffError::SlotBusy { index });
            }
            if state.finished[index].is_some() {
                return Err(HandoffError::Uncollected { index });
            }
        }
        Ok(())
    }

    /// Worker side: block until a claim is available and take it.
    ///
    /// Returns `None` once shutdown has been requested *and* the queue is
    /// empty, so queued work is always drained before workers exit.
    pub fn next(&self) -> Option<Claim<T>> {
        let state = self.lock();
        let mut state = self
            .work_added
            .wait_while(state, |s| s.pending.is_empty() && !s.shutdown)
            .unwrap_or_else(PoisonError::into_inner);
        let claim = state.pending.pop_front()?;
        state.slots[claim.index] = SlotState::InFlight;
        Some(claim)
    }

    /// Worker side: hand a processed claim back and wake waiters.
    pub fn release(&self, claim: Claim<T>) {
        let mut state = self.lock();
        debug_assert_eq!(state.slots[claim.index], SlotState::InFlight);
        state.finished[claim.index] = Some(claim.payload);
        state.slots[claim.index] = SlotState::Idle;
        drop(state);
        self.slot_released.notify_all();
    }

    /// Block until no slot is awaiting, then collect every finished
    /// payload that has not been collected yet, in slot order.
    pub fn wait_all(&self) -> Vec<Claim<T>> {
        let state = self.lock();
        let mut state = self
            .slot_released
            .wait_while(state, |s| s.any_awaiting())
            .unwrap_or_else(PoisonError::into_inner);
        state
            .finished
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.take().map(|payload| Claim { index, payload }))
            .collect()
    }

    /// Block until slot `index` is no longer awaiting, then collect its
    /// finished payload (if one is waiting).
    pub fn wait_slot(&self, index: usize) -> Option<T> {
        let state = self.lock();
        let mut state = self
            .slot_released
            .wait_while(state, |s| {
                s.slots.get(index).is_some_and(|slot| slot.is_awaiting())
            })
            .unwrap_or_else(PoisonError::into_inner);
        state.finished.get_mut(index).and_then(Option::take)
    }

    /// Stop accepting work and wake every parked worker.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.work_added.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    pub fn state_of(&self, index: usize) -> Option<SlotState> {
        self.lock().slots.get(index).copied()
    }

    pub fn awaiting_count(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.is_awaiting()).count()
    }

    pub fn queued_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn slot_count(&self) -> usize {
        self.lock().slots.len()
    }
}
