//! Boundary to the external subtitle pipeline.
//!
//! The orchestrator sees the whole audio-extraction / transcription /
//! translation chain as one opaque call: [`Pipeline::execute`]. It reports
//! progress through a [`ProgressReporter`] and honours cancellation through
//! the job's [`CancellationToken`] at its own checkpoints.

pub mod command;
pub mod error;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::state_machine::{JobId, JobParameters, JobRecord};
use crate::store::JobStore;

pub use command::CommandPipeline;
pub use error::PipelineError;

/// Everything the pipeline needs to process one job.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub job_id: JobId,
    pub files: Vec<PathBuf>,
    pub parameters: JobParameters,
}

impl PipelineRequest {
    pub fn from_record(job: &JobRecord) -> Self {
        Self {
            job_id: job.id,
            files: job.input.files.clone(),
            parameters: job.parameters.clone(),
        }
    }
}

/// Writes progress for one job into the job store.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    store: Arc<JobStore>,
    job_id: JobId,
}

impl ProgressReporter {
    pub fn new(store: Arc<JobStore>, job_id: JobId) -> Self {
        Self { store, job_id }
    }

    /// Progress never goes backwards within a run; lower values only update the message.
    pub fn report(&self, percent: u8, message: impl Into<String>) {
        self.store.report_progress(self.job_id, percent, message);
    }
}

/// Runs the subtitle pipeline for a job.
///
/// Returns the produced artifact identifiers (subtitle file paths). A
/// returned error is terminal for the job; there is no retry.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn execute(
        &self,
        request: &PipelineRequest,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, PipelineError>;
}
