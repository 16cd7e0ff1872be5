use std::fmt;

use chrono::Utc;
use thiserror::Error;

use super::job::{JobRecord, JobStatus};

/// A requested change of a job's lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A slot was granted: `pending → running`.
    Start,
    /// The pipeline produced its artifacts: `running → completed`.
    Complete(Vec<String>),
    /// The pipeline raised an error: `running → failed`.
    Fail(String),
    /// A recovered job can no longer run (its input vanished): `pending → failed`.
    Abandon(String),
    /// `pending → cancelled` or `running → cancelled`.
    Cancel,
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Complete(_) => "complete",
            Transition::Fail(_) => "fail",
            Transition::Abandon(_) => "abandon",
            Transition::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {transition} a {from} job")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub transition: &'static str,
}

/// Drives a `JobRecord` through `pending → running → {completed, failed, cancelled}`.
pub struct StateMachine;

impl StateMachine {
    /// The state `transition` leads to from `from`, or `None` if the edge does not exist.
    pub fn target(from: JobStatus, transition: &Transition) -> Option<JobStatus> {
        match (from, transition) {
            (JobStatus::Pending, Transition::Start) => Some(JobStatus::Running),
            (JobStatus::Pending, Transition::Abandon(_)) => Some(JobStatus::Failed),
            (JobStatus::Pending | JobStatus::Running, Transition::Cancel) => {
                Some(JobStatus::Cancelled)
            }
            (JobStatus::Running, Transition::Complete(_)) => Some(JobStatus::Completed),
            (JobStatus::Running, Transition::Fail(_)) => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Apply `transition` to `job`, returning the new state.
    ///
    /// Terminal states have no outgoing edges, so `result` and `failure_reason`
    /// can only ever be written once.
    pub fn apply(job: &mut JobRecord, transition: Transition) -> Result<JobStatus, InvalidTransition> {
        let from = job.status;
        let Some(to) = Self::target(from, &transition) else {
            return Err(InvalidTransition {
                from,
                transition: transition.name(),
            });
        };

        let now = Utc::now();
        match transition {
            Transition::Start => {
                job.started_at = Some(now);
                job.progress = 0;
                job.status_message = "Starting transcription...".to_string();
            }
            Transition::Complete(artifacts) => {
                job.progress = 100;
                job.status_message = "Completed".to_string();
                job.result = Some(artifacts);
                job.finished_at = Some(now);
            }
            Transition::Fail(reason) | Transition::Abandon(reason) => {
                job.status_message = "Failed".to_string();
                job.failure_reason = Some(reason);
                job.finished_at = Some(now);
            }
            Transition::Cancel => {
                job.status_message = match from {
                    JobStatus::Pending => "Cancelled before start",
                    _ => "Cancelled",
                }
                .to_string();
                job.finished_at = Some(now);
            }
        }
        job.status = to;
        Ok(to)
    }
}
