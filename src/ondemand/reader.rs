//! Listener side of on-demand playback.
//!
//! The reader polls the shared [`OnDemandState`] and only re-places the local
//! play-head on an *edge*: a timestamp it has not applied yet, or the audio
//! gate being switched on. Between edges it only fixes play/pause.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{payload, MediaPayload, OnDemandConfig, OnDemandState, PlayStatus};
use crate::{
    error::{PlaybackErr, StoreErr},
    gate::AudioGate,
    keys,
    store::{ChunkStore, ChunkStoreExt},
    utils::{
        clock::Clock,
        sched::{task, Scheduler, SingleFlight, TaskHandle},
    },
};

/// Local player for the shared file. Positions are seconds.
#[async_trait]
pub trait MediaElement: Send {
    async fn load(&mut self, media: &MediaPayload) -> Result<(), PlaybackErr>;

    /// `None` until known.
    fn duration(&self) -> Option<f64>;

    fn current_time(&self) -> f64;

    fn seek(&mut self, to: f64);

    fn is_paused(&self) -> bool;

    /// May be refused (autoplay policy); the next tick retries.
    async fn play(&mut self) -> Result<(), PlaybackErr>;

    fn pause(&mut self);

    fn unload(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Skipped,
    Idle,
    Stale,
    Failed,
    NoState,
    /// New file announced, payload not fully readable yet.
    NotReady,
    /// The current file failed to load; nothing is fetched until a new version.
    Unplayable,
    Edge { target: f64, seeked: bool, playing: bool },
    Held { playing: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReaderSnapshot {
    pub room: Option<String>,
    pub file_version: Option<u64>,
    pub applied_timestamp: Option<i64>,
    pub applied_status: Option<PlayStatus>,
}

struct ReaderState {
    room: Option<String>,
    generation: u64,
    file_version: Option<u64>,
    load_failed: bool,
    applied_ts: Option<i64>,
    applied_status: Option<PlayStatus>,
    gate_was: bool,
    media: Box<dyn MediaElement>,
    poll: Option<TaskHandle>,
}

impl ReaderState {
    fn forget(&mut self) {
        self.media.pause();
        self.media.unload();
        self.file_version = None;
        self.load_failed = false;
        self.applied_ts = None;
        self.applied_status = None;
    }

    /* 記住壞掉的版本，換新檔之前不再下載 */
    fn mark_unplayable(&mut self, version: u64) {
        self.forget();
        self.file_version = Some(version);
        self.load_failed = true;
    }

    fn at_end(&self) -> bool {
        self.media.duration().is_some_and(|d| d > 0.0 && self.media.current_time() >= d)
    }

    /* 依狀態與 gate 決定要不要播；回傳目前是否在播 */
    async fn apply_status(&mut self, status: PlayStatus, enabled: bool) -> bool {
        let want = status == PlayStatus::Playing && enabled && !self.at_end();
        if want && self.media.is_paused() {
            if let Err(e) = self.media.play().await {
                debug!(error = %e, "play refused, retrying next tick");
            }
        } else if !want && !self.media.is_paused() {
            self.media.pause();
        }
        !self.media.is_paused()
    }
}

pub struct OnDemandReader {
    store: Arc<dyn ChunkStore>,
    clock: Arc<dyn Clock>,
    sched: Arc<dyn Scheduler>,
    gate: AudioGate,
    cfg: OnDemandConfig,
    in_flight: SingleFlight,
    state: Mutex<ReaderState>,
}

impl OnDemandReader {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        clock: Arc<dyn Clock>,
        sched: Arc<dyn Scheduler>,
        gate: AudioGate,
        cfg: OnDemandConfig,
        media: Box<dyn MediaElement>,
    ) -> Arc<Self> {
        let gate_was = gate.is_enabled();
        Arc::new(Self {
            store,
            clock,
            sched,
            gate,
            cfg,
            in_flight: SingleFlight::default(),
            state: Mutex::new(ReaderState {
                room: None,
                generation: 0,
                file_version: None,
                load_failed: false,
                applied_ts: None,
                applied_status: None,
                gate_was,
                media,
                poll: None,
            }),
        })
    }

    pub async fn start(self: &Arc<Self>, room_id: &str) -> SyncOutcome {
        {
            let mut st = self.state.lock().await;
            if let Some(mut h) = st.poll.take() {
                h.cancel();
            }
            self.in_flight.reset();
            st.generation += 1;
            st.forget();
            st.room = Some(room_id.to_string());

            let weak = Arc::downgrade(self);
            st.poll = Some(self.sched.schedule(
                self.cfg.poll_every,
                task(move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(reader) = weak.upgrade() {
                            reader.poll().await;
                        }
                    }
                }),
            ));
            info!(room = room_id, "following shared file");
        }
        self.poll().await
    }

    /// Idempotent.
    pub async fn stop(&self) {
        let mut st = self.state.lock().await;
        if let Some(mut h) = st.poll.take() {
            h.cancel();
        }
        self.in_flight.reset();
        st.generation += 1;
        st.forget();
        st.room = None;
    }

    pub async fn poll(&self) -> SyncOutcome {
        let Some(_flight) = self.in_flight.try_enter() else {
            return SyncOutcome::Skipped;
        };

        let (room, gen, known_version) = {
            let st = self.state.lock().await;
            match &st.room {
                Some(r) => (r.clone(), st.generation, st.file_version),
                None => return SyncOutcome::Idle,
            }
        };

        let shared: Option<OnDemandState> = match self.store.get_json(&keys::audio_state(&room)).await {
            Ok(v) => v,
            Err(e) => {
                warn!(room, error = %e, "on-demand poll failed");
                return SyncOutcome::Failed;
            }
        };
        let Some(shared) = shared else { return SyncOutcome::NoState };

        /* ── 換檔：先把完整檔案拿到手 ── */
        let fresh = if known_version != Some(shared.file_version) {
            match payload::download(self.store.as_ref(), &room).await {
                Ok(Some(p)) => Some(p),
                Ok(None) => {
                    // 舊檔不能繼續播
                    let mut st = self.state.lock().await;
                    if st.generation == gen && !st.media.is_paused() {
                        st.media.pause();
                    }
                    return SyncOutcome::NotReady;
                }
                Err(e @ (StoreErr::Decode(_) | StoreErr::Json(_))) => {
                    warn!(room, version = shared.file_version, error = %e, "shared payload is corrupt");
                    let mut st = self.state.lock().await;
                    if st.generation != gen {
                        return SyncOutcome::Stale;
                    }
                    st.mark_unplayable(shared.file_version);
                    return SyncOutcome::Unplayable;
                }
                Err(e) => {
                    warn!(room, error = %e, "payload download failed");
                    return SyncOutcome::Failed;
                }
            }
        } else {
            None
        };

        let mut st = self.state.lock().await;
        if st.generation != gen {
            return SyncOutcome::Stale;
        }
        if let Some(media) = fresh {
            st.forget();
            if let Err(e) = st.media.load(&media).await {
                warn!(room, version = shared.file_version, error = %e, "shared file would not load");
                st.mark_unplayable(shared.file_version);
                return SyncOutcome::Unplayable;
            }
            st.file_version = Some(shared.file_version);
            info!(room, version = shared.file_version, file = %shared.file_name, "shared file loaded");
        }

        if st.load_failed {
            return SyncOutcome::Unplayable;
        }

        let enabled = self.gate.is_enabled();
        let gate_opened = enabled && !st.gate_was;
        st.gate_was = enabled;

        if st.applied_ts == Some(shared.timestamp) && !gate_opened {
            let playing = match st.applied_status {
                Some(status) => st.apply_status(status, enabled).await,
                None => !st.media.is_paused(),
            };
            return SyncOutcome::Held { playing };
        }

        let upper = st.media.duration().unwrap_or(f64::INFINITY);
        let target = shared.position_at(self.clock.now_ms()).clamp(0.0, upper);
        let seeked = (st.media.current_time() - target).abs() > self.cfg.seek_threshold;
        if seeked {
            debug!(room, from = st.media.current_time(), to = target, "seeking to shared position");
            st.media.seek(target);
        }
        st.applied_ts = Some(shared.timestamp);
        st.applied_status = Some(shared.status);
        let playing = st.apply_status(shared.status, enabled).await;
        SyncOutcome::Edge { target, seeked, playing }
    }

    pub async fn snapshot(&self) -> ReaderSnapshot {
        let st = self.state.lock().await;
        ReaderSnapshot {
            room: st.room.clone(),
            file_version: st.file_version,
            applied_timestamp: st.applied_ts,
            applied_status: st.applied_status,
        }
    }
}
