//! Per-job cooperative cancellation.
//!
//! Each job owns one [`CancellationToken`]. The token itself is what the
//! execution unit and the pipeline hold; the registry only maps ids to tokens
//! so that cancel requests arriving by id can reach the right job.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::state_machine::JobId;

#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `id`, created on first use.
    pub fn register(&self, id: JobId) -> CancellationToken {
        self.tokens.lock().entry(id).or_default().clone()
    }

    /// Idempotent. Unknown ids are a no-op; returns whether a token was found.
    pub fn request_cancel(&self, id: JobId) -> bool {
        match self.tokens.lock().get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, id: JobId) -> bool {
        self.tokens
            .lock()
            .get(&id)
            .is_some_and(CancellationToken::is_cancelled)
    }

    pub fn remove(&self, id: JobId) {
        self.tokens.lock().remove(&id);
    }
}
