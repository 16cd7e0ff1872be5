//! The live table of every job this process knows about.
//!
//! One `parking_lot::Mutex` guards the whole table. Each job is only ever
//! mutated by the execution unit that owns it (plus the cancel/bump requests
//! routed through the orchestrator), so the table lock is the only lock needed.

use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::OrchestratorError;
use crate::persistence::PersistedQueueSnapshot;
use crate::state_machine::{
    InputDescriptor, JobId, JobParameters, JobRecord, JobStatus, StateMachine, Transition,
};

#[derive(Debug)]
struct StoreInner {
    jobs: BTreeMap<JobId, JobRecord>,
    next_id: JobId,
}

#[derive(Debug)]
pub struct JobStore {
    inner: Mutex<StoreInner>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                jobs: BTreeMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Create a `pending` record with a freshly allocated id.
    pub fn insert(&self, input: InputDescriptor, parameters: JobParameters) -> JobRecord {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let record = JobRecord::new(id, input, parameters);
        inner.jobs.insert(id, record.clone());
        record
    }

    /// Re-insert a record carried over from a previous process.
    pub fn restore(&self, record: JobRecord) {
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.max(record.id + 1);
        inner.jobs.insert(record.id, record);
    }

    /// Never moves the counter backwards.
    pub fn reserve_ids_below(&self, next_id: JobId) {
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.max(next_id);
    }

    pub fn next_id(&self) -> JobId {
        self.inner.lock().next_id
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.inner.lock().jobs.get(&id).cloned()
    }

    /// All known jobs, in id order.
    pub fn list(&self) -> Vec<JobRecord> {
        self.inner.lock().jobs.values().cloned().collect()
    }

    /// Apply a lifecycle transition and return the updated record.
    pub fn apply(&self, id: JobId, transition: Transition) -> Result<JobRecord, OrchestratorError> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(OrchestratorError::JobNotFound(id))?;
        StateMachine::apply(job, transition)?;
        Ok(job.clone())
    }

    /// Mutate the non-lifecycle fields of a live job. Terminal jobs are left
    /// untouched; returns whether the mutator ran.
    pub fn update(&self, id: JobId, mutate: impl FnOnce(&mut JobRecord)) -> bool {
        let mut inner = self.inner.lock();
        match inner.jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                mutate(job);
                true
            }
            _ => false,
        }
    }

    pub fn report_progress(&self, id: JobId, percent: u8, message: impl Into<String>) {
        self.update(id, |job| job.advance(percent, message));
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.inner
            .lock()
            .jobs
            .values()
            .filter(|j| j.status == status)
            .count()
    }

    /// Every non-terminal job plus the id counter.
    pub fn snapshot(&self) -> PersistedQueueSnapshot {
        let inner = self.inner.lock();
        PersistedQueueSnapshot {
            next_id: inner.next_id,
            saved_at: Utc::now(),
            jobs: inner
                .jobs
                .values()
                .filter(|j| !j.status.is_terminal())
                .cloned()
                .collect(),
        }
    }

    /// Drop the oldest terminal records so at most `keep` remain. Returns the pruned ids.
    pub fn prune_terminal(&self, keep: usize) -> Vec<JobId> {
        let mut inner = self.inner.lock();
        let terminal: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| j.status.is_terminal())
            .map(|j| j.id)
            .collect();

        let excess = terminal.len().saturating_sub(keep);
        let pruned: Vec<JobId> = terminal.into_iter().take(excess).collect();
        for id in &pruned {
            inner.jobs.remove(id);
        }
        if !pruned.is_empty() {
            debug!(count = pruned.len(), "Pruned terminal jobs from live table");
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{sample_input, sample_parameters};

    #[test]
    fn ids_are_sequential_and_unique() {
        let store = JobStore::new();
        let a = store.insert(sample_input("a.mkv"), sample_parameters());
        let b = store.insert(sample_input("b.mkv"), sample_parameters());
        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
        assert_eq!(store.next_id(), 2);
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn restore_advances_counter_past_recovered_ids() {
        let store = JobStore::new();
        store.reserve_ids_below(5);
        store.restore(JobRecord::new(11, sample_input("x.mkv"), sample_parameters()));
        store.reserve_ids_below(3);
        assert_eq!(store.next_id(), 12);

        let fresh = store.insert(sample_input("y.mkv"), sample_parameters());
        assert_eq!(fresh.id, 12);
    }

    #[test]
    fn apply_unknown_job_is_not_found() {
        let store = JobStore::new();
        let err = store.apply(42, Transition::Start).unwrap_err();
        assert!(matches!(err, OrchestratorError::JobNotFound(42)));
    }

    #[test]
    fn update_skips_terminal_jobs() {
        let store = JobStore::new();
        let job = store.insert(sample_input("a.mkv"), sample_parameters());
        store.apply(job.id, Transition::Cancel).unwrap();

        let ran = store.update(job.id, |j| j.status_message = "overwritten".into());
        assert!(!ran);
        assert_eq!(store.get(job.id).unwrap().status_message, "Cancelled before start");
    }

    #[test]
    fn progress_only_moves_forward() {
        let store = JobStore::new();
        let job = store.insert(sample_input("a.mkv"), sample_parameters());
        store.apply(job.id, Transition::Start).unwrap();

        store.report_progress(job.id, 60, "Translating");
        store.report_progress(job.id, 30, "Transcribing");
        let current = store.get(job.id).unwrap();
        assert_eq!(current.progress, 60);
    }

    #[test]
    fn snapshot_contains_only_live_jobs() {
        let store = JobStore::new();
        let a = store.insert(sample_input("a.mkv"), sample_parameters());
        let b = store.insert(sample_input("b.mkv"), sample_parameters());
        let c = store.insert(sample_input("c.mkv"), sample_parameters());
        store.apply(a.id, Transition::Start).unwrap();
        store.apply(b.id, Transition::Cancel).unwrap();

        let snapshot = store.snapshot();
        let ids: Vec<JobId> = snapshot.jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
        assert_eq!(snapshot.next_id, 3);
    }

    #[test]
    fn prune_keeps_newest_terminal_and_all_live_jobs() {
        let store = JobStore::new();
        for i in 0..5 {
            let job = store.insert(sample_input(&format!("{i}.mkv")), sample_parameters());
            if i < 4 {
                store.apply(job.id, Transition::Cancel).unwrap();
            }
        }

        let pruned = store.prune_terminal(2);
        assert_eq!(pruned, vec![0, 1]);
        let remaining: Vec<JobId> = store.list().iter().map(|j| j.id).collect();
        assert_eq!(remaining, vec![2, 3, 4]);
        assert_eq!(store.count(JobStatus::Pending), 1);
    }
}
