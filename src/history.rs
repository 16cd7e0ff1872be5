//! Size-capped ledger of finished jobs, persisted after every mutation.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::PersistError;
use crate::persistence::{quarantine, read_json, write_atomic};
use crate::state_machine::{HistoryEntry, JobId, JobRecord, JobStatus};

pub const HISTORY_FILE_NAME: &str = "history.json";

/// Maximum number of entries kept. The oldest-inserted entry is evicted first.
pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct HistoryLedger {
    path: PathBuf,
    // Newest first.
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl HistoryLedger {
    /// Open the ledger at `path`, loading any existing entries. An unreadable
    /// file is moved aside and the ledger starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = path.into();
        let mut entries: VecDeque<HistoryEntry> = match read_json::<Vec<HistoryEntry>>(&path).await {
            Ok(Some(entries)) => entries.into(),
            Ok(None) => VecDeque::new(),
            Err(PersistError::Json { source, .. }) => {
                warn!(path = %path.display(), error = %source, "History ledger unreadable, starting empty");
                quarantine(&path).await?;
                VecDeque::new()
            }
            Err(e) => return Err(e),
        };
        entries.truncate(HISTORY_CAPACITY);
        debug!(path = %path.display(), entries = entries.len(), "History ledger opened");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Append a terminal job. Returns `false` (and writes nothing) if the job
    /// is not terminal or is already in the ledger.
    pub async fn record(&self, job: &JobRecord) -> Result<bool, PersistError> {
        if !job.status.is_terminal() {
            return Ok(false);
        }

        let mut entries = self.entries.lock().await;
        if entries.iter().any(|e| e.job_id == job.id) {
            debug!(job_id = job.id, "Job already recorded in history");
            return Ok(false);
        }

        entries.push_front(HistoryEntry::from_record(job));
        while entries.len() > HISTORY_CAPACITY {
            if let Some(evicted) = entries.pop_back() {
                debug!(job_id = evicted.job_id, "Evicted oldest history entry");
            }
        }
        self.persist(&entries).await?;
        Ok(true)
    }

    /// Entries, newest first.
    pub async fn list(&self) -> Vec<HistoryEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Remove every entry. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize, PersistError> {
        let mut entries = self.entries.lock().await;
        let removed = entries.len();
        entries.clear();
        self.persist(&entries).await?;
        info!(removed, "History cleared");
        Ok(removed)
    }

    /// Remove every entry in `status`. Returns how many were removed.
    pub async fn clear_by_state(&self, status: JobStatus) -> Result<usize, PersistError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.status != status);
        let removed = before - entries.len();
        self.persist(&entries).await?;
        info!(removed, %status, "History cleared by state");
        Ok(removed)
    }

    /// Highest job id in the ledger, used to keep the id counter ahead of it.
    pub async fn max_job_id(&self) -> Option<JobId> {
        self.entries.lock().await.iter().map(|e| e.job_id).max()
    }

    /// Ids of every job in the ledger.
    pub async fn job_ids(&self) -> HashSet<JobId> {
        self.entries.lock().await.iter().map(|e| e.job_id).collect()
    }

    async fn persist(&self, entries: &VecDeque<HistoryEntry>) -> Result<(), PersistError> {
        let json = serde_json::to_vec_pretty(entries).map_err(|e| PersistError::json(&self.path, e))?;
        write_atomic(&self.path, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use crate::state_machine::{StateMachine, Transition, sample_input, sample_parameters};

    fn finished(id: JobId, transition: Transition) -> JobRecord {
        let mut job = JobRecord::new(id, sample_input("a.mkv"), sample_parameters());
        if !matches!(transition, Transition::Cancel) {
            StateMachine::apply(&mut job, Transition::Start).unwrap();
        }
        StateMachine::apply(&mut job, transition).unwrap();
        job
    }

    async fn ledger(dir: &Path) -> HistoryLedger {
        HistoryLedger::open(dir.join(HISTORY_FILE_NAME)).await.unwrap()
    }

    #[tokio::test]
    async fn records_newest_first_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let history = ledger(dir.path()).await;

        history.record(&finished(0, Transition::Complete(vec!["a.srt".into()]))).await.unwrap();
        history.record(&finished(1, Transition::Fail("boom".into()))).await.unwrap();

        let ids: Vec<JobId> = history.list().await.iter().map(|e| e.job_id).collect();
        assert_eq!(ids, vec![1, 0]);

        let reopened = ledger(dir.path()).await;
        let entries = reopened.list().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].failure_reason.as_deref(), Some("boom"));
        assert_eq!(entries[1].result, Some(vec!["a.srt".to_string()]));
    }

    #[tokio::test]
    async fn ignores_live_jobs_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let history = ledger(dir.path()).await;

        let live = JobRecord::new(5, sample_input("a.mkv"), sample_parameters());
        assert!(!history.record(&live).await.unwrap());

        let done = finished(6, Transition::Cancel);
        assert!(history.record(&done).await.unwrap());
        assert!(!history.record(&done).await.unwrap());
        assert_eq!(history.len().await, 1);
    }

    #[tokio::test]
    async fn the_101st_entry_evicts_exactly_the_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let history = ledger(dir.path()).await;

        for id in 0..HISTORY_CAPACITY as JobId {
            history.record(&finished(id, Transition::Cancel)).await.unwrap();
        }
        assert_eq!(history.len().await, HISTORY_CAPACITY);

        history.record(&finished(100, Transition::Cancel)).await.unwrap();
        let entries = history.list().await;
        assert_eq!(entries.len(), HISTORY_CAPACITY);
        assert_eq!(entries.first().unwrap().job_id, 100);
        assert_eq!(entries.last().unwrap().job_id, 1);
        assert!(entries.iter().all(|e| e.job_id != 0));
    }

    #[tokio::test]
    async fn clear_by_state_keeps_other_states() {
        let dir = tempfile::tempdir().unwrap();
        let history = ledger(dir.path()).await;
        history.record(&finished(0, Transition::Fail("x".into()))).await.unwrap();
        history.record(&finished(1, Transition::Complete(vec![]))).await.unwrap();
        history.record(&finished(2, Transition::Fail("y".into()))).await.unwrap();

        assert_eq!(history.clear_by_state(JobStatus::Failed).await.unwrap(), 2);
        let remaining = ledger(dir.path()).await.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].status, JobStatus::Completed);

        assert_eq!(history.clear().await.unwrap(), 1);
        assert!(ledger(dir.path()).await.list().await.is_empty());
    }

    #[tokio::test]
    async fn unreadable_ledger_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(HISTORY_FILE_NAME), b"not json").unwrap();
        let history = ledger(dir.path()).await;
        assert!(history.list().await.is_empty());
        assert_eq!(history.max_job_id().await, None);
    }

    #[tokio::test]
    async fn unreadable_ledger_is_kept_aside_after_next_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HISTORY_FILE_NAME);
        std::fs::write(&path, b"[{\"job_id\": 1,").unwrap();

        let history = ledger(dir.path()).await;
        assert!(history.record(&finished(4, Transition::Cancel)).await.unwrap());

        let aside = path.with_extension("json.corrupt");
        assert_eq!(std::fs::read(&aside).unwrap(), b"[{\"job_id\": 1,");
        let reopened = ledger(dir.path()).await;
        assert_eq!(reopened.job_ids().await, HashSet::from([4]));
    }
}
