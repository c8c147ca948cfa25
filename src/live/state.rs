use serde::{Deserialize, Serialize};

/// Broadcaster's live status record, one per room.
///
/// `seq` is the last published chunk (`-1` before the first one) and never
/// goes down while `active` holds. `active: false` means the stream ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveState {
    pub active: bool,
    #[serde(default)]
    pub paused: bool,
    pub seq: i64,
    #[serde(default = "default_mime")]
    pub mime_type: String,
    #[serde(default)]
    pub ts: i64,
}

fn default_mime() -> String {
    "audio/webm".to_string()
}
