//! On-disk queue snapshot used to resume work after a restart.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::PersistError;
use crate::state_machine::{JobId, JobRecord, JobStatus};

pub const QUEUE_FILE_NAME: &str = "queue.json";

/// Mirror of every `pending`/`running` job plus the id counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedQueueSnapshot {
    pub next_id: JobId,
    pub saved_at: DateTime<Utc>,
    pub jobs: Vec<JobRecord>,
}

/// Write `bytes` to `path` through a sibling temp file and a rename, so a
/// crash mid-write never leaves a torn file behind. The temp file is synced
/// before the rename so the new name never points at unflushed data.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistError::io(parent, e))?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&temp_path)
        .await
        .map_err(|e| PersistError::io(&temp_path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| PersistError::io(&temp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| PersistError::io(&temp_path, e))?;
    drop(file);
    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| PersistError::io(path, e))?;
    Ok(())
}

/// Rename an unreadable state file to `<name>.json.corrupt` so the next
/// write does not destroy it. Returns the new path.
pub async fn quarantine(path: &Path) -> Result<PathBuf, PersistError> {
    let aside = path.with_extension("json.corrupt");
    tokio::fs::rename(path, &aside)
        .await
        .map_err(|e| PersistError::io(path, e))?;
    warn!(path = %aside.display(), "Moved unreadable state file aside");
    Ok(aside)
}

/// Read and parse a JSON document, `None` if the file does not exist.
pub async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, PersistError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistError::io(path, e)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| PersistError::json(path, e))
}

/// The queue snapshot file. Writes are serialised so the last writer always
/// carries the latest capture.
#[derive(Debug)]
pub struct QueueSnapshotFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl QueueSnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Capture a snapshot with `capture` and write it, overwriting the previous one.
    ///
    /// The capture runs while holding the write lock, so two concurrent
    /// saves can never land on disk out of order.
    pub async fn save_with(
        &self,
        capture: impl FnOnce() -> PersistedQueueSnapshot,
    ) -> Result<(), PersistError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = capture();
        let json =
            serde_json::to_vec_pretty(&snapshot).map_err(|e| PersistError::json(&self.path, e))?;
        write_atomic(&self.path, &json).await?;
        debug!(
            path = %self.path.display(),
            jobs = snapshot.jobs.len(),
            next_id = snapshot.next_id,
            "Queue snapshot written"
        );
        Ok(())
    }

    /// Read the last snapshot. Called once at startup.
    pub async fn load(&self) -> Result<Option<PersistedQueueSnapshot>, PersistError> {
        read_json(&self.path).await
    }

    /// Move an unreadable snapshot aside so the next save does not destroy it.
    pub async fn quarantine(&self) -> Result<PathBuf, PersistError> {
        quarantine(&self.path).await
    }
}

/// What to do with each job found in a snapshot.
#[derive(Debug, Default)]
pub struct RecoveryPlan {
    pub next_id: JobId,
    /// Jobs to re-submit, demoted to `pending` with progress reset, in queue order.
    pub resumable: Vec<JobRecord>,
    /// Jobs whose input no longer exists. They go straight to `failed`.
    pub missing_input: Vec<(JobRecord, String)>,
    /// Cancelled (or cancel-requested) jobs, and jobs the history ledger
    /// already shows as finished, that must not come back.
    pub dropped: Vec<JobId>,
}

impl RecoveryPlan {
    /// `finished` holds the ids already recorded in the history ledger. A
    /// crash between the history write and the next snapshot write leaves
    /// such a job live in the snapshot; it has already run and is dropped.
    pub fn from_snapshot(snapshot: PersistedQueueSnapshot, finished: &HashSet<JobId>) -> Self {
        let mut plan = RecoveryPlan {
            next_id: snapshot.next_id,
            ..Default::default()
        };

        for mut job in snapshot.jobs {
            plan.next_id = plan.next_id.max(job.id + 1);

            if finished.contains(&job.id) {
                info!(job_id = job.id, "Job already recorded as finished, not resuming");
                plan.dropped.push(job.id);
                continue;
            }

            match job.status {
                JobStatus::Pending | JobStatus::Running if !job.cancel_requested => {}
                _ => {
                    info!(job_id = job.id, status = %job.status, "Dropping job from recovered queue");
                    plan.dropped.push(job.id);
                    continue;
                }
            }

            if job.status == JobStatus::Running {
                info!(job_id = job.id, "Demoting interrupted job to pending");
            }
            job.status = JobStatus::Pending;
            job.progress = 0;
            job.started_at = None;
            job.status_message = "Waiting for available slot...".to_string();

            let missing = job.input.missing_files();
            if missing.is_empty() {
                plan.resumable.push(job);
            } else {
                let reason = format!(
                    "Input no longer exists: {}",
                    missing
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                plan.missing_input.push((job, reason));
            }
        }

        plan.resumable.sort_by_key(|j| (j.queue_key, j.id));
        plan
    }
}
