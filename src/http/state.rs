use crate::server::AccumulatorHandle;
use chrono::{DateTime, Utc};

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Front door to the utterance accumulator (session stats, cancellation)
    pub accumulator: AccumulatorHandle,

    /// When the server role started
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(accumulator: AccumulatorHandle) -> Self {
        Self {
            accumulator,
            started_at: Utc::now(),
        }
    }
}
