use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::admission::{SubmitRequest, admit};
use crate::cancellation::CancellationRegistry;
use crate::config::Config;
use crate::error::{OrchestratorError, PersistError};
use crate::gate::AdmissionGate;
use crate::history::HistoryLedger;
use crate::persistence::{QueueSnapshotFile, RecoveryPlan};
use crate::pipeline::{Pipeline, PipelineError, PipelineRequest, ProgressReporter};
use crate::state_machine::{HistoryEntry, JobId, JobRecord, JobStatus, Transition};
use crate::store::JobStore;

/// A job as reported to callers: the record plus its advisory queue position.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: JobRecord,
    pub queue_position: Option<usize>,
}

/// How a cancel request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was waiting for a slot and is now `cancelled`.
    Cancelled,
    /// The job is running; it stops at its next checkpoint.
    Requested,
    /// The job had already been cancelled.
    AlreadyCancelled,
}

/// What happened to the persisted queue at startup.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RecoveryReport {
    pub resumed: Vec<JobId>,
    pub failed: Vec<JobId>,
    pub dropped: Vec<JobId>,
}

/// Drives jobs from submission to a terminal state under a global concurrency cap.
pub struct JobOrchestrator {
    config: Config,
    store: Arc<JobStore>,
    cancellations: CancellationRegistry,
    gate: Arc<AdmissionGate>,
    snapshots: QueueSnapshotFile,
    history: HistoryLedger,
    pipeline: Arc<dyn Pipeline>,
    tasks: TaskTracker,
    recovered: AtomicBool,
    // Jobs admitted since the last successful snapshot write, with the write error.
    unsaved: Mutex<HashMap<JobId, String>>,
}

impl JobOrchestrator {
    /// Open the state directory and build an idle orchestrator. Call
    /// [`recover`](Self::recover) before accepting submissions.
    pub async fn open(
        config: Config,
        pipeline: Arc<dyn Pipeline>,
    ) -> Result<Arc<Self>, OrchestratorError> {
        tokio::fs::create_dir_all(&config.state_dir)
            .await
            .map_err(|e| PersistError::io(&config.state_dir, e))?;
        let history = HistoryLedger::open(config.history_path()).await?;

        info!(
            state_dir = %config.state_dir.display(),
            capacity = config.max_concurrent_jobs,
            history_entries = history.len().await,
            "Job orchestrator ready"
        );

        Ok(Arc::new(Self {
            gate: Arc::new(AdmissionGate::new(
                config.max_concurrent_jobs,
                config.poll_interval(),
            )),
            snapshots: QueueSnapshotFile::new(config.queue_path()),
            store: Arc::new(JobStore::new()),
            cancellations: CancellationRegistry::new(),
            history,
            pipeline,
            tasks: TaskTracker::new(),
            recovered: AtomicBool::new(false),
            unsaved: Mutex::new(HashMap::new()),
            config,
        }))
    }

    /// Replay the persisted queue: interrupted jobs restart from scratch,
    /// cancelled ones stay gone, and jobs whose input vanished fail without
    /// ever entering the gate. Jobs the history ledger already holds have
    /// finished and are dropped. Only the first call does anything.
    pub async fn recover(self: &Arc<Self>) -> Result<RecoveryReport, OrchestratorError> {
        if self.recovered.swap(true, Ordering::SeqCst) {
            warn!("Queue already recovered, ignoring");
            return Ok(RecoveryReport::default());
        }

        let snapshot = match self.snapshots.load().await {
            Ok(snapshot) => snapshot,
            Err(PersistError::Json { source, .. }) => {
                error!(
                    path = %self.snapshots.path().display(),
                    error = %source,
                    "Queue snapshot is corrupt, starting with an empty queue"
                );
                self.snapshots.quarantine().await?;
                None
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(max) = self.history.max_job_id().await {
            self.store.reserve_ids_below(max + 1);
        }

        let mut report = RecoveryReport::default();
        if let Some(snapshot) = snapshot {
            let finished = self.history.job_ids().await;
            let plan = RecoveryPlan::from_snapshot(snapshot, &finished);
            self.store.reserve_ids_below(plan.next_id);
            report.dropped = plan.dropped;

            for (job, reason) in plan.missing_input {
                let id = job.id;
                self.store.restore(job);
                warn!(job_id = id, %reason, "Recovered job cannot run");
                self.finish(id, Transition::Abandon(reason)).await;
                report.failed.push(id);
            }

            for job in plan.resumable {
                let (id, key) = (job.id, job.queue_key);
                self.store.restore(job);
                self.launch(id, key);
                report.resumed.push(id);
            }
        }

        let _ = self.persist().await;
        info!(
            resumed = report.resumed.len(),
            failed = report.failed.len(),
            dropped = report.dropped.len(),
            pending = self.store.count(JobStatus::Pending),
            next_id = self.store.next_id(),
            "Queue recovered"
        );
        Ok(report)
    }

    /// Validate and enqueue a new job. Admission problems are returned here
    /// and never create a job; everything later is reported on the record.
    pub async fn submit(self: &Arc<Self>, request: SubmitRequest) -> Result<JobId, OrchestratorError> {
        let (input, parameters) = admit(&request, &self.config).inspect_err(|e| {
            info!(path = %request.path, error = %e, "Submission rejected");
        })?;

        let job = self.store.insert(input, parameters);
        info!(
            job_id = job.id,
            path = %job.input.path,
            files = job.input.files.len(),
            language = %job.parameters.language,
            waiting = self.gate.waiting() + 1,
            "Job submitted"
        );
        self.launch(job.id, job.queue_key);
        if let Err(e) = self.persist().await {
            warn!(
                job_id = job.id,
                error = %e,
                "Job accepted but not saved, it will not survive a restart"
            );
            self.unsaved.lock().insert(job.id, e.to_string());
        }
        Ok(job.id)
    }

    /// Register the job with the gate and spawn its execution unit.
    fn launch(self: &Arc<Self>, id: JobId, queue_key: i64) {
        let token = self.cancellations.register(id);
        self.gate.enqueue(id, queue_key);

        let this = Arc::clone(self);
        self.tasks.spawn(
            async move { this.run_job(id, token).await }.instrument(info_span!("job", job_id = id)),
        );
    }

    async fn run_job(self: Arc<Self>, id: JobId, token: CancellationToken) {
        let mut last_position = None;
        let store = Arc::clone(&self.store);
        let permit = self
            .gate
            .acquire(id, &token, |position| {
                if last_position != Some(position) {
                    last_position = Some(position);
                    store.update(id, |job| {
                        job.status_message =
                            format!("Waiting for available slot (position {position})...");
                    });
                }
            })
            .await;

        let Some(_permit) = permit else {
            // Cancelled while waiting. A no-op if `cancel` already recorded it.
            self.finish(id, Transition::Cancel).await;
            return;
        };

        if self.cancellations.is_cancelled(id) {
            self.finish(id, Transition::Cancel).await;
            return;
        }

        let job = match self.store.apply(id, Transition::Start) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Job could not start");
                return;
            }
        };
        info!(
            running = self.gate.running(),
            capacity = self.gate.capacity(),
            "Job running"
        );
        let _ = self.persist().await;

        let request = PipelineRequest::from_record(&job);
        let progress = ProgressReporter::new(Arc::clone(&self.store), id);
        let pipeline = Arc::clone(&self.pipeline);
        let cancel = token.clone();
        // A panicking pipeline must not leave the job stuck in `running`.
        let outcome = tokio::spawn(
            async move { pipeline.execute(&request, &progress, &cancel).await }.in_current_span(),
        )
        .await;

        let transition = match outcome {
            Ok(Ok(artifacts)) => Transition::Complete(artifacts),
            Ok(Err(PipelineError::Cancelled)) => Transition::Cancel,
            Ok(Err(e)) => Transition::Fail(e.to_string()),
            Err(join_error) => Transition::Fail(format!("pipeline panicked: {join_error}")),
        };
        self.finish(id, transition).await;
    }

    /// Apply a terminal transition. Only the first terminal transition of a
    /// job succeeds, so the history entry is written exactly once.
    async fn finish(&self, id: JobId, transition: Transition) -> bool {
        let job = match self.store.apply(id, transition) {
            Ok(job) => job,
            Err(e) => {
                debug!(job_id = id, error = %e, "Transition ignored");
                return false;
            }
        };

        match job.status {
            JobStatus::Failed => warn!(
                job_id = id,
                reason = job.failure_reason.as_deref().unwrap_or_default(),
                "Job failed"
            ),
            status => info!(job_id = id, %status, "Job finished"),
        }

        if let Err(e) = self.history.record(&job).await {
            error!(job_id = id, error = %e, "Failed to record job history");
        }
        for pruned in self.store.prune_terminal(self.config.max_retained_jobs) {
            self.cancellations.remove(pruned);
        }
        let _ = self.persist().await;
        true
    }

    /// Write the queue snapshot. A successful write covers every live job,
    /// so it clears the unsaved marks.
    async fn persist(&self) -> Result<(), PersistError> {
        let result = self.snapshots.save_with(|| self.store.snapshot()).await;
        match &result {
            Ok(()) => self.unsaved.lock().clear(),
            Err(e) => error!(error = %e, "Failed to write queue snapshot"),
        }
        result
    }

    /// Current record and queue position of a job. A job admitted while the
    /// snapshot could not be written says so in its status message.
    pub fn status(&self, id: JobId) -> Result<JobView, OrchestratorError> {
        let mut job = self.store.get(id).ok_or(OrchestratorError::JobNotFound(id))?;
        if let Some(error) = self.unsaved.lock().get(&id) {
            job.status_message = format!(
                "{} (not saved to disk, will not survive a restart: {error})",
                job.status_message
            );
        }
        Ok(JobView {
            queue_position: self.gate.position(id),
            job,
        })
    }

    pub fn queue_position(&self, id: JobId) -> Option<usize> {
        self.gate.position(id)
    }

    pub fn list(&self) -> Vec<JobRecord> {
        self.store.list()
    }

    /// Cancel a job. Pending jobs are cancelled on the spot; running jobs are
    /// asked to stop and finish at their next checkpoint. Cancelling an
    /// already-cancelled job is a no-op; cancelling a completed or failed one
    /// is rejected.
    pub async fn cancel(&self, id: JobId) -> Result<CancelOutcome, OrchestratorError> {
        let job = self.store.get(id).ok_or(OrchestratorError::JobNotFound(id))?;
        match job.status {
            JobStatus::Cancelled => return Ok(CancelOutcome::AlreadyCancelled),
            JobStatus::Completed | JobStatus::Failed => {
                return Err(OrchestratorError::AlreadyFinished(id));
            }
            JobStatus::Pending | JobStatus::Running => {}
        }

        // Withdraw before signalling the token so the waiting unit cannot
        // race us into a slot or into its own cancel path.
        let withdrawn = self.gate.withdraw(id);
        self.cancellations.request_cancel(id);

        if withdrawn {
            self.finish(id, Transition::Cancel).await;
            info!(job_id = id, "Pending job cancelled");
            return Ok(CancelOutcome::Cancelled);
        }

        self.store.update(id, |job| {
            job.cancel_requested = true;
            job.status_message = "Cancellation requested...".to_string();
        });
        let _ = self.persist().await;
        info!(job_id = id, "Cancellation requested for running job");
        Ok(CancelOutcome::Requested)
    }

    /// Move a pending job to the head of the queue. Returns its new queue key.
    pub async fn bump(&self, id: JobId) -> Result<i64, OrchestratorError> {
        let job = self.store.get(id).ok_or(OrchestratorError::JobNotFound(id))?;
        if job.status != JobStatus::Pending {
            return Err(OrchestratorError::NotPending(id));
        }
        let key = self.gate.bump(id).ok_or(OrchestratorError::NotPending(id))?;
        self.store.update(id, |job| job.queue_key = key);
        let _ = self.persist().await;
        info!(job_id = id, queue_key = key, "Job bumped to the head of the queue");
        Ok(key)
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.list().await
    }

    /// Purge the history ledger, or only the entries in `status`.
    pub async fn clear_history(&self, status: Option<JobStatus>) -> Result<usize, OrchestratorError> {
        let removed = match status {
            Some(status) => self.history.clear_by_state(status).await?,
            None => self.history.clear().await?,
        };
        Ok(removed)
    }

    /// Request cancellation of every live job. Returns how many were signalled.
    pub async fn cancel_all(&self) -> usize {
        let live: Vec<JobId> = self
            .store
            .list()
            .into_iter()
            .filter(|j| !j.status.is_terminal())
            .map(|j| j.id)
            .collect();
        let mut signalled = 0;
        for id in live {
            if self.cancel(id).await.is_ok() {
                signalled += 1;
            }
        }
        signalled
    }

    /// Wait until every execution unit has exited.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Number of execution units still alive.
    pub fn active_units(&self) -> usize {
        self.tasks.len()
    }
}
