mod job;
mod state;

pub use job::{HistoryEntry, InputDescriptor, JobId, JobParameters, JobRecord, JobStatus};
pub use state::{InvalidTransition, StateMachine, Transition};

#[cfg(test)]
pub(crate) use job::tests::{sample_input, sample_parameters};
