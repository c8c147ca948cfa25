pub mod capture;
pub mod encoder;
pub mod player;
pub mod state;
pub mod wav;

pub use capture::{CaptureProvider, CaptureSource, PcmCapture, PcmFileProvider};
pub use encoder::{LiveBroadcaster, LiveConfig, LiveStatus};
pub use player::{ChunkSink, LivePlayer, Phase, PlayerConfig, PlayerSnapshot, PollOutcome, QueuedChunk, SinkEvent};
pub use state::LiveState;
