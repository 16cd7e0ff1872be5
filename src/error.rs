use std::path::PathBuf;

use thiserror::Error;

use crate::state_machine::{InvalidTransition, JobId};

/// Problems detected while validating a submission. The job is never created.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("No file specified")]
    MissingInput,

    #[error("File not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("No media files to process in {}", .0.display())]
    NoFilesToProcess(PathBuf),

    #[error("Unsupported target language: {0}")]
    UnsupportedLanguage(String),

    #[error("Existing subtitle files found ({}); enable overwrite to replace them", .0.join(", "))]
    ExistingOutputs(Vec<String>),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures reading or writing the queue snapshot and the history ledger.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        PersistError::Json {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {0} already finished")]
    AlreadyFinished(JobId),

    #[error("Job {0} is not pending")]
    NotPending(JobId),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_outputs_lists_files() {
        let err = AdmissionError::ExistingOutputs(vec!["a.en.srt".into(), "a.nl.srt".into()]);
        assert_eq!(
            err.to_string(),
            "Existing subtitle files found (a.en.srt, a.nl.srt); enable overwrite to replace them"
        );
    }

    #[test]
    fn admission_converts_into_orchestrator_error() {
        let err: OrchestratorError = AdmissionError::MissingInput.into();
        assert!(matches!(err, OrchestratorError::Admission(AdmissionError::MissingInput)));
        assert_eq!(err.to_string(), "No file specified");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OrchestratorError>();
        assert_send_sync::<PersistError>();
    }
}
