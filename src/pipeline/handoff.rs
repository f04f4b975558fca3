//! Memory-bounded hand-off between the reader, the workers and the sink.
//!
//! Both resident maps live under one mutex so the reader's admission check
//! sees a consistent picture of the whole pipeline. Each role blocks on its
//! own condition variable and is woken by the stage that feeds it:
//!
//! * `input_ready` - workers waiting for a block to claim
//! * `output_ready` - the sink waiting for its next id
//! * `slot_free` - the reader waiting for resident memory to drain
//!
//! A block is resident from the moment the reader starts loading it until
//! the sink takes it: pending-input, in a worker's hands, or pending-output.
//! The reader only starts a block while fewer than `cap` are resident, which
//! keeps both maps at or below `cap` at all times.
//!
//! Admission counts the sum of all four states, not each map on its own, so
//! at most `cap` blocks are anywhere in the pipeline even when workers sit
//! idle. Blocks a worker holds have already left pending-input; if only the
//! maps were counted they could all land in pending-output at once and push
//! it past `cap`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::{BlockzipError, Result};
use crate::memory::MemoryBudget;

#[derive(Debug, Default)]
struct State {
    pending_input: BTreeMap<u32, Vec<u8>>,
    pending_output: BTreeMap<u32, Vec<u8>>,
    /// Blocks the reader is loading right now.
    loading: usize,
    /// Blocks claimed by a worker and not yet published.
    in_flight: usize,
    /// Blocks ever claimed; workers stop once this reaches the total.
    claimed: usize,
    /// Set once the reader has hit the cap; cleared when it resumes.
    throttled: bool,
    cancelled: bool,
    peak_input: usize,
    peak_output: usize,
}

impl State {
    fn resident(&self) -> usize {
        self.loading + self.pending_input.len() + self.in_flight + self.pending_output.len()
    }
}

/// Resident block counts observed during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResidentPeaks {
    pub input: usize,
    pub output: usize,
}

pub struct Handoff {
    state: Mutex<State>,
    input_ready: Condvar,
    output_ready: Condvar,
    slot_free: Condvar,
    cap: usize,
    resume_threshold: usize,
    total: usize,
    completed: AtomicUsize,
}

impl Handoff {
    pub fn new(total: usize, budget: &MemoryBudget) -> Self {
        Self::with_cap(total, budget.cap(), budget.resume_threshold())
    }

    pub(crate) fn with_cap(total: usize, cap: usize, resume_threshold: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            input_ready: Condvar::new(),
            output_ready: Condvar::new(),
            slot_free: Condvar::new(),
            cap: cap.max(1),
            resume_threshold,
            total,
            completed: AtomicUsize::new(0),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Blocks published to pending-output so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    // A panicking role never leaves the maps half-updated, so a poisoned
    // lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, cv: &Condvar, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Reader: wait until another block may become resident, then reserve it.
    ///
    /// Once throttled, the reader stays blocked until pending-output has
    /// drained to `cap / 2` so it does not hand the sink one block at a time.
    pub fn acquire_slot(&self) -> Result<()> {
        let mut state = self.lock();
        loop {
            if state.cancelled {
                return Err(BlockzipError::Cancelled);
            }
            let below_cap = state.resident() < self.cap;
            let open = if state.throttled {
                below_cap && state.pending_output.len() <= self.resume_threshold
            } else {
                below_cap
            };
            if open {
                state.throttled = false;
                state.loading += 1;
                return Ok(());
            }
            state.throttled = true;
            state = self.wait(&self.slot_free, state);
        }
    }

    /// Reader: publish a loaded block to pending-input.
    pub fn push_input(&self, id: u32, bytes: Vec<u8>) -> Result<()> {
        let mut state = self.lock();
        state.loading = state.loading.saturating_sub(1);
        if state.cancelled {
            return Err(BlockzipError::Cancelled);
        }
        state.pending_input.insert(id, bytes);
        state.peak_input = state.peak_input.max(state.pending_input.len());
        drop(state);
        self.input_ready.notify_one();
        Ok(())
    }

    /// Reader: give back a reserved slot whose block could not be loaded.
    pub fn release_slot(&self) {
        let mut state = self.lock();
        state.loading = state.loading.saturating_sub(1);
        drop(state);
        self.slot_free.notify_one();
    }

    /// Worker: take any pending-input block.
    ///
    /// Returns `Ok(None)` once every block of the run has been claimed. The
    /// lowest pending id is handed out, but callers must not rely on any
    /// order: only the sink restores file order.
    pub fn claim_input(&self) -> Result<Option<(u32, Vec<u8>)>> {
        let mut state = self.lock();
        loop {
            if state.cancelled {
                return Err(BlockzipError::Cancelled);
            }
            if state.claimed >= self.total {
                return Ok(None);
            }
            if let Some((id, bytes)) = state.pending_input.pop_first() {
                state.claimed += 1;
                state.in_flight += 1;
                let all_claimed = state.claimed >= self.total;
                drop(state);
                if all_claimed {
                    // Wake idle workers so they can exit.
                    self.input_ready.notify_all();
                }
                return Ok(Some((id, bytes)));
            }
            state = self.wait(&self.input_ready, state);
        }
    }

    /// Worker: publish a transformed block to pending-output.
    pub fn push_output(&self, id: u32, bytes: Vec<u8>) -> Result<()> {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.cancelled {
            return Err(BlockzipError::Cancelled);
        }
        state.pending_output.insert(id, bytes);
        state.peak_output = state.peak_output.max(state.pending_output.len());
        self.completed.fetch_add(1, Ordering::AcqRel);
        drop(state);
        self.output_ready.notify_one();
        Ok(())
    }

    /// Worker: drop a claimed block that failed to transform.
    pub fn abandon_in_flight(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Sink: wait for exactly block `id` and take it.
    pub fn take_output(&self, id: u32) -> Result<Vec<u8>> {
        let mut state = self.lock();
        loop {
            if state.cancelled {
                return Err(BlockzipError::Cancelled);
            }
            if let Some(bytes) = state.pending_output.remove(&id) {
                drop(state);
                self.slot_free.notify_one();
                return Ok(bytes);
            }
            state = self.wait(&self.output_ready, state);
        }
    }

    /// Stop every role. Blocked roles wake up and return `Cancelled`.
    pub fn cancel(&self) {
        let mut state = self.lock();
        if state.cancelled {
            return;
        }
        state.cancelled = true;
        state.pending_input.clear();
        state.pending_output.clear();
        drop(state);
        self.input_ready.notify_all();
        self.output_ready.notify_all();
        self.slot_free.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn peaks(&self) -> ResidentPeaks {
        let state = self.lock();
        ResidentPeaks {
            input: state.peak_input,
            output: state.peak_output,
        }
    }

    /// Current (pending-input, pending-output) sizes.
    pub fn resident_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.pending_input.len(), state.pending_output.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn reader_stops_at_cap() {
        let handoff = Handoff::with_cap(10, 2, 1);
        handoff.acquire_slot().unwrap();
        handoff.push_input(0, vec![0]).unwrap();
        handoff.acquire_slot().unwrap();
        handoff.push_input(1, vec![1]).unwrap();

        let handoff = Arc::new(handoff);
        let reader = {
            let handoff = Arc::clone(&handoff);
            thread::spawn(move || handoff.acquire_slot())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished(), "reader admitted a block above the cap");

        // Move block 0 all the way through; resident drops to 1.
        let (id, bytes) = handoff.claim_input().unwrap().unwrap();
        handoff.push_output(id, bytes).unwrap();
        handoff.take_output(0).unwrap();
        reader.join().unwrap().unwrap();
        assert_eq!(handoff.peaks(), ResidentPeaks { input: 2, output: 1 });
    }

    #[test]
    fn in_flight_blocks_hold_their_slot() {
        let handoff = Arc::new(Handoff::with_cap(10, 2, 1));
        for id in 0..2 {
            handoff.acquire_slot().unwrap();
            handoff.push_input(id, vec![id as u8]).unwrap();
        }
        // Both blocks move into workers' hands; pending-input is empty.
        let first = handoff.claim_input().unwrap().unwrap();
        let second = handoff.claim_input().unwrap().unwrap();
        assert_eq!(handoff.resident_counts(), (0, 0));

        let reader = {
            let handoff = Arc::clone(&handoff);
            thread::spawn(move || handoff.acquire_slot())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished(), "reader admitted past blocks in flight");

        handoff.push_output(first.0, first.1).unwrap();
        handoff.push_output(second.0, second.1).unwrap();
        handoff.take_output(0).unwrap();
        handoff.take_output(1).unwrap();
        reader.join().unwrap().unwrap();
        assert!(handoff.peaks().output <= 2);
    }

    #[test]
    fn throttled_reader_waits_for_output_to_drain() {
        let handoff = Arc::new(Handoff::with_cap(10, 4, 2));
        for id in 0..4 {
            handoff.acquire_slot().unwrap();
            handoff.push_input(id, vec![id as u8]).unwrap();
        }
        // Workers finish 1, 2, 3 but block 0 is still in flight.
        let mut claimed = Vec::new();
        for _ in 0..4 {
            claimed.push(handoff.claim_input().unwrap().unwrap());
        }
        for (id, bytes) in claimed.drain(1..) {
            handoff.push_output(id, bytes).unwrap();
        }

        let reader = {
            let handoff = Arc::clone(&handoff);
            thread::spawn(move || handoff.acquire_slot())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished());

        // Block 0 finishes and is written: resident is 3 (< cap) but
        // pending-output still holds 3 > cap / 2.
        let (id, bytes) = claimed.pop().unwrap();
        handoff.push_output(id, bytes).unwrap();
        handoff.take_output(0).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished(), "reader resumed above the resume threshold");

        handoff.take_output(1).unwrap();
        reader.join().unwrap().unwrap();
    }

    #[test]
    fn workers_exit_once_everything_is_claimed() {
        let handoff = Handoff::with_cap(1, 4, 2);
        handoff.acquire_slot().unwrap();
        handoff.push_input(0, vec![7]).unwrap();
        assert_eq!(handoff.claim_input().unwrap(), Some((0, vec![7])));
        assert_eq!(handoff.claim_input().unwrap(), None);
    }

    #[test]
    fn cancel_wakes_blocked_roles() {
        let handoff = Arc::new(Handoff::with_cap(3, 1, 0));
        let worker = {
            let handoff = Arc::clone(&handoff);
            thread::spawn(move || handoff.claim_input())
        };
        let sink = {
            let handoff = Arc::clone(&handoff);
            thread::spawn(move || handoff.take_output(0))
        };
        thread::sleep(Duration::from_millis(20));
        handoff.cancel();
        assert!(worker.join().unwrap().unwrap_err().is_cancellation());
        assert!(sink.join().unwrap().unwrap_err().is_cancellation());
        assert!(handoff.acquire_slot().unwrap_err().is_cancellation());
    }
}
