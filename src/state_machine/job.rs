use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-visible job identifier. Allocated from a persisted counter and never reused.
pub type JobId = u64;

/// Tracks the lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// `Completed`, `Failed` and `Cancelled` are terminal: no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// What the caller asked to process: the path as submitted plus the media
/// files it resolved to at admission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDescriptor {
    pub path: String,
    pub files: Vec<PathBuf>,
}

impl InputDescriptor {
    /// Files that no longer exist on disk.
    pub fn missing_files(&self) -> Vec<&PathBuf> {
        self.files.iter().filter(|f| !f.exists()).collect()
    }
}

/// Pipeline settings captured once at submission. A recovered job replays with these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    /// Normalised ISO-639-1 target language (`nl`, `de`, ...).
    pub language: String,
    /// Speech model size handed to the transcription stage.
    pub model: String,
    pub overwrite: bool,
    /// Only write the original-language subtitles.
    #[serde(default)]
    pub original_only: bool,
}

/// A single submitted unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub input: InputDescriptor,
    pub status: JobStatus,
    pub status_message: String,
    pub progress: u8,
    /// Sort key for slot grants. Starts equal to `id`; a bump moves it below
    /// every other pending key.
    pub queue_key: i64,
    /// Set when a running job has been asked to stop but has not reached a checkpoint yet.
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<Vec<String>>,
    pub failure_reason: Option<String>,
    pub parameters: JobParameters,
}

impl JobRecord {
    pub fn new(id: JobId, input: InputDescriptor, parameters: JobParameters) -> Self {
        Self {
            id,
            input,
            status: JobStatus::Pending,
            status_message: "Waiting for available slot...".to_string(),
            progress: 0,
            queue_key: id as i64,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            failure_reason: None,
            parameters,
        }
    }

    /// Raise progress within the current run. Never lowers it and never exceeds 100.
    pub fn advance(&mut self, percent: u8, message: impl Into<String>) {
        if self.status != JobStatus::Running {
            return;
        }
        self.progress = self.progress.max(percent.min(100));
        self.status_message = message.into();
    }
}

/// Immutable snapshot of a job taken when it reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub job_id: JobId,
    pub input: InputDescriptor,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub result: Option<Vec<String>>,
    pub failure_reason: Option<String>,
}

impl HistoryEntry {
    /// Build a ledger entry from a terminal job. A job cancelled before it ever
    /// ran uses its submission time as the start.
    pub fn from_record(job: &JobRecord) -> Self {
        let started_at = job.started_at.unwrap_or(job.created_at);
        let completed_at = job.finished_at.unwrap_or_else(Utc::now);
        let duration = completed_at - started_at;

        Self {
            job_id: job.id,
            input: job.input.clone(),
            status: job.status,
            started_at,
            completed_at,
            duration_ms: duration.num_milliseconds().max(0),
            result: job.result.clone(),
            failure_reason: job.failure_reason.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_input(name: &str) -> InputDescriptor {
        InputDescriptor {
            path: name.to_string(),
            files: vec![PathBuf::from(name)],
        }
    }

    pub(crate) fn sample_parameters() -> JobParameters {
        JobParameters {
            language: "nl".into(),
            model: "medium".into(),
            overwrite: true,
            original_only: false,
        }
    }

    #[test]
    fn job_creation_defaults() {
        let job = JobRecord::new(7, sample_input("a.mkv"), sample_parameters());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.queue_key, 7);
        assert!(job.result.is_none());
        assert!(job.failure_reason.is_none());
        assert!(!job.cancel_requested);
    }

    #[test]
    fn advance_is_monotonic_and_capped() {
        let mut job = JobRecord::new(1, sample_input("a.mkv"), sample_parameters());
        job.advance(50, "ignored while pending");
        assert_eq!(job.progress, 0);

        job.status = JobStatus::Running;
        job.advance(30, "Transcribing");
        job.advance(10, "Extracting");
        assert_eq!(job.progress, 30);
        assert_eq!(job.status_message, "Extracting");

        job.advance(250, "Done");
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn status_parse_and_display() {
        assert_eq!("Failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert_eq!("canceled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert!("done".parse::<JobStatus>().is_err());
        assert_eq!(JobStatus::Running.to_string(), "running");
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn history_entry_uses_created_at_when_never_started() {
        let mut job = JobRecord::new(3, sample_input("a.mkv"), sample_parameters());
        job.status = JobStatus::Cancelled;
        job.finished_at = Some(job.created_at + chrono::Duration::milliseconds(1500));

        let entry = HistoryEntry::from_record(&job);
        assert_eq!(entry.job_id, 3);
        assert_eq!(entry.started_at, job.created_at);
        assert_eq!(entry.duration_ms, 1500);
        assert_eq!(entry.status, JobStatus::Cancelled);
    }

    #[test]
    fn missing_files_reports_vanished_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.mkv");
        std::fs::write(&present, b"x").unwrap();
        let input = InputDescriptor {
            path: dir.path().display().to_string(),
            files: vec![present, dir.path().join("gone.mkv")],
        };
        let missing = input.missing_files();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].ends_with("gone.mkv"));
    }

    #[test]
    fn record_json_uses_snake_case_states() {
        let job = JobRecord::new(9, sample_input("a.mkv"), sample_parameters());
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["queue_key"], 9);
    }
}
