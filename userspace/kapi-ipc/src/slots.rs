// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fixed-capacity correlation ring for in-flight remote calls
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//!
//! Slot lifecycle: reserved -> in-flight -> completed -> released.
//!
//! INVARIANTS:
//!   - Slot ids are `counter & (capacity - 1)`; an occupied id is never handed out again
//!   - A sync slot is released by its waiter, an async slot by `complete`
//!   - A sync slot abandoned by a timed-out waiter is released by the late `complete`
//!   - Every slot is released exactly once, including by `teardown`
//!
//! Lock order: slot mutex, then pending-call state mutex. Waiters never hold a state guard while
//! taking a slot mutex.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kapi_wire::{Reply, ResultCode};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Correlation failures.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// Capacity is zero, not a power of two, or above 2^31.
    #[error("capacity {0} is not a power of two in 1..=2^31")]
    InvalidCapacity(usize),
    /// The ring wrapped onto a slot that is still in use.
    #[error("correlation slot {slot} still in use (too many calls in flight)")]
    TableFull {
        /// Colliding slot id.
        slot: u32,
    },
    /// No pending call under this id.
    #[error("no pending call in slot {0}")]
    UnknownSlot(u32),
    /// Operation not valid in the slot's current phase.
    #[error("slot {slot} is {phase:?}")]
    InvalidPhase {
        /// Slot id.
        slot: u32,
        /// Phase found.
        phase: SlotPhase,
    },
    /// `wait` on an async slot.
    #[error("slot {0} belongs to an async call")]
    NotSync(u32),
    /// Sync wait gave up; the slot stays reserved until the late reply arrives.
    #[error("no reply for slot {slot} within the timeout")]
    Timeout {
        /// Abandoned slot id.
        slot: u32,
    },
    /// Table torn down.
    #[error("correlation table torn down")]
    TornDown,
}

/// Lifecycle phase of an occupied slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotPhase {
    /// Allocated, request not yet sent.
    Reserved,
    /// Request sent, awaiting the reply.
    InFlight,
    /// Reply stored, waiter not yet woken or not yet collected.
    Completed,
    /// Sync waiter timed out; the reply is discarded on arrival.
    Abandoned,
    /// Released by teardown.
    TornDown,
}

/// Snapshot of a removed slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingState {
    /// Slot id.
    pub slot: u32,
    /// Issued by a sync call.
    pub sync: bool,
    /// Phase at removal.
    pub phase: SlotPhase,
    /// Stored reply, if the call completed.
    pub reply: Option<Reply>,
}

struct CallState {
    phase: SlotPhase,
    reply: Option<Reply>,
}

struct PendingCall {
    sync: bool,
    state: Mutex<CallState>,
    ready: Condvar,
}

/// Fixed-capacity map from slot id to pending call.
pub struct CorrelationTable {
    mask: u32,
    next: AtomicU32,
    slots: Box<[Mutex<Option<Arc<PendingCall>>>]>,
    last_async_failure: AtomicU32,
    torn_down: AtomicBool,
}

impl CorrelationTable {
    /// Creates a table with `capacity` slots.
    pub fn new(capacity: usize) -> Result<Self, CorrelationError> {
        if !capacity.is_power_of_two() || capacity > 1 << 31 {
            return Err(CorrelationError::InvalidCapacity(capacity));
        }
        let slots = (0..capacity).map(|_| Mutex::new(None)).collect();
        Ok(Self {
            mask: (capacity - 1) as u32,
            next: AtomicU32::new(0),
            slots,
            last_async_failure: AtomicU32::new(0),
            torn_down: AtomicBool::new(false),
        })
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    /// Allocates the next ring position.
    pub fn reserve(&self, sync: bool) -> Result<u32, CorrelationError> {
        if self.torn_down.load(Ordering::Acquire) {
            return Err(CorrelationError::TornDown);
        }
        let id = self.next.fetch_add(1, Ordering::Relaxed) & self.mask;
        let mut entry = self.slot(id).lock();
        if entry.is_some() {
            return Err(CorrelationError::TableFull { slot: id });
        }
        *entry = Some(Arc::new(PendingCall {
            sync,
            state: Mutex::new(CallState { phase: SlotPhase::Reserved, reply: None }),
            ready: Condvar::new(),
        }));
        Ok(id)
    }

    /// Records that the request for `id` has been handed to the transport.
    pub fn mark_in_flight(&self, id: u32) -> Result<(), CorrelationError> {
        let call = self.pending(id)?;
        let mut state = call.state.lock();
        match state.phase {
            SlotPhase::Reserved => {
                state.phase = SlotPhase::InFlight;
                Ok(())
            }
            phase => Err(CorrelationError::InvalidPhase { slot: id, phase }),
        }
    }

    /// Delivers the reply for `id`. Runs on the receive path and never blocks on a waiter.
    pub fn complete(&self, id: u32, reply: Reply) -> Result<(), CorrelationError> {
        let mut entry = self.slot(id).lock();
        let call = entry.clone().ok_or(CorrelationError::UnknownSlot(id))?;

        if !call.sync {
            *entry = None;
            drop(entry);
            if !reply.status.is_success() {
                log::warn!("kapi-ipc: async call in slot {id} failed: {}", reply.status);
                self.last_async_failure.store(reply.status.0, Ordering::Release);
            }
            return Ok(());
        }

        let mut state = call.state.lock();
        let phase = state.phase;
        match phase {
            SlotPhase::Reserved | SlotPhase::InFlight => {
                state.phase = SlotPhase::Completed;
                state.reply = Some(reply);
                call.ready.notify_one();
                Ok(())
            }
            SlotPhase::Abandoned => {
                drop(state);
                *entry = None;
                log::debug!("kapi-ipc: late reply released abandoned slot {id}");
                Ok(())
            }
            phase => Err(CorrelationError::InvalidPhase { slot: id, phase }),
        }
    }

    /// Removes the slot regardless of phase and returns what it held.
    pub fn take(&self, id: u32) -> Option<PendingState> {
        let call = self.slot(id).lock().take()?;
        let state = call.state.lock();
        Some(PendingState { slot: id, sync: call.sync, phase: state.phase, reply: state.reply })
    }

    /// Blocks until `complete` fires for the sync slot `id`, then releases it.
    pub fn wait(&self, id: u32) -> Result<Reply, CorrelationError> {
        self.wait_inner(id, None)
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, leaving the slot abandoned.
    pub fn wait_timeout(&self, id: u32, timeout: Duration) -> Result<Reply, CorrelationError> {
        self.wait_inner(id, Some(Instant::now() + timeout))
    }

    fn wait_inner(&self, id: u32, deadline: Option<Instant>) -> Result<Reply, CorrelationError> {
        let call = self.pending(id)?;
        if !call.sync {
            return Err(CorrelationError::NotSync(id));
        }
        let mut state = call.state.lock();
        loop {
            match (state.phase, state.reply) {
                (SlotPhase::Completed, Some(reply)) => {
                    drop(state);
                    self.release(id, &call);
                    return Ok(reply);
                }
                (SlotPhase::TornDown, _) => return Err(CorrelationError::TornDown),
                (SlotPhase::Abandoned, _) => {
                    let phase = SlotPhase::Abandoned;
                    return Err(CorrelationError::InvalidPhase { slot: id, phase });
                }
                _ => {}
            }
            match deadline {
                None => call.ready.wait(&mut state),
                Some(deadline) => {
                    if call.ready.wait_until(&mut state, deadline).timed_out()
                        && state.phase != SlotPhase::Completed
                        && state.phase != SlotPhase::TornDown
                    {
                        state.phase = SlotPhase::Abandoned;
                        log::warn!("kapi-ipc: sync call in slot {id} timed out");
                        return Err(CorrelationError::Timeout { slot: id });
                    }
                }
            }
        }
    }

    /// Most recent failure reported by an async call; never cleared.
    pub fn last_async_failure(&self) -> Option<ResultCode> {
        match self.last_async_failure.load(Ordering::Acquire) {
            0 => None,
            code => Some(ResultCode(code)),
        }
    }

    /// Releases every occupied slot and wakes blocked waiters with [`CorrelationError::TornDown`].
    ///
    /// Returns the number of slots released; later calls release nothing.
    pub fn teardown(&self) -> usize {
        self.torn_down.store(true, Ordering::Release);
        let mut released = 0;
        for slot in self.slots.iter() {
            let Some(call) = slot.lock().take() else {
                continue;
            };
            released += 1;
            let mut state = call.state.lock();
            state.phase = SlotPhase::TornDown;
            call.ready.notify_all();
        }
        if released > 0 {
            log::info!("kapi-ipc: teardown released {released} pending slots");
        }
        released
    }

    fn slot(&self, id: u32) -> &Mutex<Option<Arc<PendingCall>>> {
        &self.slots[(id & self.mask) as usize]
    }

    fn pending(&self, id: u32) -> Result<Arc<PendingCall>, CorrelationError> {
        self.slot(id).lock().clone().ok_or(CorrelationError::UnknownSlot(id))
    }

    /// Removes `id` only if it still holds `call`.
    fn release(&self, id: u32, call: &Arc<PendingCall>) {
        let mut entry = self.slot(id).lock();
        if entry.as_ref().is_some_and(|held| Arc::ptr_eq(held, call)) {
            *entry = None;
        }
    }
}

impl Drop for CorrelationTable {
    fn drop(&mut self) {
        self.teardown();
    }
}
