use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayStatus {
    Playing,
    Paused,
}

/// Shared play-head of the file uploaded to a room. Written by the creator
/// only.
///
/// `timestamp` is when `position` was exact; listeners extrapolate from it
/// once per event, never continuously. A new `file_version` means the media
/// itself was replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnDemandState {
    pub file_version: u64,
    pub file_name: String,
    pub status: PlayStatus,
    pub position: f64,
    pub timestamp: i64,
}

impl OnDemandState {
    /// Where the play-head should be at `now_ms`, unclamped.
    pub fn position_at(&self, now_ms: i64) -> f64 {
        match self.status {
            PlayStatus::Playing => self.position + (now_ms.saturating_sub(self.timestamp) as f64 / 1000.0).max(0.0),
            PlayStatus::Paused => self.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(status: PlayStatus) -> OnDemandState {
        OnDemandState { file_version: 1, file_name: "a.mp3".into(), status, position: 30.0, timestamp: 10_000 }
    }

    #[test]
    fn playing_extrapolates_from_anchor() {
        assert_eq!(at(PlayStatus::Playing).position_at(15_000), 35.0);
        // 時鐘落後時不倒退
        assert_eq!(at(PlayStatus::Playing).position_at(9_000), 30.0);
        assert_eq!(at(PlayStatus::Paused).position_at(99_000), 30.0);
    }

    #[test]
    fn absurd_anchor_does_not_overflow() {
        let mut st = at(PlayStatus::Playing);
        st.timestamp = i64::MIN;
        assert!(st.position_at(10_000).is_finite());
        st.timestamp = i64::MAX;
        assert_eq!(st.position_at(10_000), 30.0);
    }

    #[test]
    fn wire_shape() {
        assert_eq!(
            serde_json::to_value(at(PlayStatus::Paused)).unwrap(),
            json!({"fileVersion": 1, "fileName": "a.mp3", "status": "paused", "position": 30.0, "timestamp": 10_000})
        );
    }
}
