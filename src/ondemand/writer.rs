use std::sync::Arc;

use tracing::info;

use super::{
    payload::{self, MediaPayload, PayloadMeta},
    OnDemandConfig, OnDemandState, PlayStatus,
};
use crate::{
    error::{bad, AppResult},
    keys,
    store::{ChunkStore, ChunkStoreExt},
    utils::clock::Clock,
};

/// Creator side: every local play / pause / seek becomes one state write.
pub struct OnDemandWriter {
    store: Arc<dyn ChunkStore>,
    clock: Arc<dyn Clock>,
    room: String,
    cfg: OnDemandConfig,
    current: Option<OnDemandState>,
}

impl OnDemandWriter {
    pub fn new(store: Arc<dyn ChunkStore>, clock: Arc<dyn Clock>, room: impl Into<String>, cfg: OnDemandConfig) -> Self {
        Self { store, clock, room: room.into(), cfg, current: None }
    }

    pub fn current(&self) -> Option<&OnDemandState> {
        self.current.as_ref()
    }

    /// Uploads a new file and announces it paused at 0.
    pub async fn share(&mut self, file_name: &str, media: &MediaPayload) -> AppResult<PayloadMeta> {
        let meta = payload::upload(self.store.as_ref(), &self.room, media, self.cfg.chunk_size, self.cfg.state_ttl).await?;
        // 重啟後記憶體是空的，以 store 裡的版本為底
        let stored: Option<OnDemandState> = self.store.get_json(&keys::audio_state(&self.room)).await?;
        let last = [stored.as_ref(), self.current.as_ref()].into_iter().flatten().map(|s| s.file_version).max();
        let file_version = last.map_or(1, |v| v + 1);
        self.emit(OnDemandState {
            file_version,
            file_name: file_name.to_string(),
            status: PlayStatus::Paused,
            position: 0.0,
            timestamp: 0,
        })
        .await?;
        info!(room = %self.room, file = file_name, version = file_version, "file shared");
        Ok(meta)
    }

    pub async fn play(&mut self, position: f64) -> AppResult<()> {
        self.update(Some(PlayStatus::Playing), position).await
    }

    pub async fn pause(&mut self, position: f64) -> AppResult<()> {
        self.update(Some(PlayStatus::Paused), position).await
    }

    /// Moves the play-head, keeping the current status.
    pub async fn seek(&mut self, position: f64) -> AppResult<()> {
        self.update(None, position).await
    }

    async fn update(&mut self, status: Option<PlayStatus>, position: f64) -> AppResult<()> {
        if !position.is_finite() || position < 0.0 {
            return Err(bad(format!("invalid position {position}")));
        }
        let Some(prev) = self.current.clone() else {
            return Err(bad("no file has been shared in this room"));
        };
        self.emit(OnDemandState { status: status.unwrap_or(prev.status), position, ..prev }).await
    }

    async fn emit(&mut self, mut next: OnDemandState) -> AppResult<()> {
        // 同一毫秒內的兩個事件也要被讀者視為不同的 edge
        let now = self.clock.now_ms();
        next.timestamp = match &self.current {
            Some(prev) => now.max(prev.timestamp.saturating_add(1)),
            None => now,
        };
        self.store.put_json(&keys::audio_state(&self.room), &next, self.cfg.state_ttl).await?;
        self.current = Some(next);
        Ok(())
    }
}
