pub mod payload;
pub mod reader;
pub mod state;
pub mod writer;

use std::time::Duration;

use crate::keys;

pub use payload::{MediaPayload, PayloadMeta, CHUNK_SIZE};
pub use reader::{MediaElement, OnDemandReader, SyncOutcome};
pub use state::{OnDemandState, PlayStatus};
pub use writer::OnDemandWriter;

#[derive(Debug, Clone)]
pub struct OnDemandConfig {
    pub poll_every: Duration,
    /// Seconds of drift tolerated before an edge seeks.
    pub seek_threshold: f64,
    pub chunk_size: usize,
    pub state_ttl: u64,
}

impl Default for OnDemandConfig {
    fn default() -> Self {
        Self {
            poll_every: Duration::from_secs(1),
            seek_threshold: 0.2,
            chunk_size: CHUNK_SIZE,
            state_ttl: keys::STATE_TTL,
        }
    }
}
