//! Error types for the subtitle pipeline.

use thiserror::Error;

/// Errors that can occur while running the pipeline for a job.
///
/// [`Cancelled`](PipelineError::Cancelled) is not a failure: the orchestrator
/// turns it into a `cancelled` job. Every other variant becomes `failed`
/// with the display text as its reason.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A checkpoint observed the job's cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// An external stage exited unsuccessfully or produced no output.
    #[error("{stage} failed: {message}")]
    Stage { stage: &'static str, message: String },

    /// The stage command could not be started or its files could not be touched.
    #[error("{stage}: {source}")]
    Io {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Markers of accelerator or host memory exhaustion in stage output.
const OUT_OF_MEMORY_MARKERS: &[&str] = &[
    "cuda out of memory",
    "out of memory",
    "cudnn_status_alloc_failed",
    "cannot allocate memory",
    "std::bad_alloc",
];

const OUT_OF_MEMORY_HINT: &str = "The speech or translation model ran out of memory. \
Use a smaller model (set `model = \"small\"` or `\"base\"`, or WHISPER_MODEL=small) \
or lower `max_concurrent_jobs` so fewer models share the accelerator.";

impl PipelineError {
    /// Build a stage failure, appending remediation advice for well-known
    /// resource exhaustion conditions.
    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        let mut message = message.into();
        let lower = message.to_lowercase();
        if OUT_OF_MEMORY_MARKERS.iter().any(|m| lower.contains(m)) {
            message.push('\n');
            message.push_str(OUT_OF_MEMORY_HINT);
        }
        PipelineError::Stage { stage, message }
    }
}
