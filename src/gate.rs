//! Bounded admission of jobs into the `running` state.
//!
//! Waiters are ordered by their queue key (the job id, unless bumped) and
//! only the head of the queue may take a free slot. Releasing a slot wakes
//! every waiter through a [`Notify`]; waiters additionally re-check on a poll
//! tick so that their reported queue position stays fresh.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::state_machine::JobId;

#[derive(Debug, Default)]
struct GateState {
    running: usize,
    waiting: BTreeSet<(i64, JobId)>,
    keys: HashMap<JobId, i64>,
}

impl GateState {
    fn head(&self) -> Option<JobId> {
        self.waiting.first().map(|&(_, id)| id)
    }

    fn remove(&mut self, id: JobId) -> bool {
        match self.keys.remove(&id) {
            Some(key) => self.waiting.remove(&(key, id)),
            None => false,
        }
    }

    fn position(&self, id: JobId, capacity: usize) -> Option<usize> {
        let key = *self.keys.get(&id)?;
        let ahead = self.waiting.range(..(key, id)).count();
        Some(ahead + (self.running + 1).saturating_sub(capacity))
    }
}

/// Counting gate with FIFO-by-key ordering and cancellation-aware waits.
#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    poll_interval: Duration,
    state: Mutex<GateState>,
    notify: Notify,
}

/// One held slot. Dropping it releases the slot, whichever way the holder exits.
#[derive(Debug)]
pub struct SlotPermit {
    gate: Arc<AdmissionGate>,
    job_id: JobId,
}

impl SlotPermit {
    #[cfg(test)]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.gate.release(self.job_id);
    }
}

impl AdmissionGate {
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            poll_interval,
            state: Mutex::new(GateState::default()),
            notify: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    pub fn waiting(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Register `id` as waiting with sort key `key`.
    pub fn enqueue(&self, id: JobId, key: i64) {
        {
            let mut state = self.state.lock();
            state.remove(id);
            state.keys.insert(id, key);
            state.waiting.insert((key, id));
        }
        self.notify.notify_waiters();
    }

    /// Remove a waiter. Returns `false` if `id` was not waiting (already granted or unknown).
    pub fn withdraw(&self, id: JobId) -> bool {
        let removed = self.state.lock().remove(id);
        if removed {
            self.notify.notify_waiters();
        }
        removed
    }

    /// Move a waiting job to the head of the queue. Returns its new key, or
    /// `None` if the job is not waiting.
    pub fn bump(&self, id: JobId) -> Option<i64> {
        let key = {
            let mut state = self.state.lock();
            if !state.keys.contains_key(&id) {
                return None;
            }
            let min = state.waiting.first().map(|&(key, _)| key)?;
            let key = min - 1;
            state.remove(id);
            state.keys.insert(id, key);
            state.waiting.insert((key, id));
            key
        };
        self.notify.notify_waiters();
        Some(key)
    }

    /// Advisory queue position of a waiting job: waiters ahead of it plus the
    /// number of slots that still have to free up.
    pub fn position(&self, id: JobId) -> Option<usize> {
        self.state.lock().position(id, self.capacity)
    }

    /// Wait for a slot.
    ///
    /// Returns `None` without ever taking a slot if `cancel` fires or the job
    /// is withdrawn while waiting. `on_wait` receives the current queue
    /// position on every tick the job spends waiting.
    pub async fn acquire(
        self: &Arc<Self>,
        id: JobId,
        cancel: &CancellationToken,
        mut on_wait: impl FnMut(usize),
    ) -> Option<SlotPermit> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let position = {
                let mut state = self.state.lock();
                if cancel.is_cancelled() {
                    let removed = state.remove(id);
                    drop(state);
                    if removed {
                        self.notify.notify_waiters();
                    }
                    debug!(job_id = id, "Cancelled while waiting for a slot");
                    return None;
                }
                if !state.keys.contains_key(&id) {
                    return None;
                }
                if state.running < self.capacity && state.head() == Some(id) {
                    state.remove(id);
                    state.running += 1;
                    let running = state.running;
                    drop(state);
                    // The next head may fit into a remaining slot.
                    self.notify.notify_waiters();
                    debug!(job_id = id, running, capacity = self.capacity, "Slot granted");
                    return Some(SlotPermit {
                        gate: Arc::clone(self),
                        job_id: id,
                    });
                }
                state.position(id, self.capacity).unwrap_or(0)
            };

            on_wait(position);

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    fn release(&self, id: JobId) {
        {
            let mut state = self.state.lock();
            state.running = state.running.saturating_sub(1);
            debug!(job_id = id, running = state.running, "Slot released");
        }
        self.notify.notify_waiters();
    }
}
