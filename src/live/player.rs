//! Listener side of a live stream: poll the live record, fetch what is new,
//! play it strictly in order, one chunk at a time.
//!
//! ```text
//!  Idle ──start──▶ Waiting ──active──▶ Streaming ──inactive──▶ Draining ──▶ Waiting
//!    ▲                                                                        │
//!    └──────────────────────────────── stop ◀─────────────────────────────────┘
//! ```
//!
//! Falling more than `backlog_threshold` chunks behind drops everything local
//! and jumps straight to the newest chunk: fresh audio beats complete audio.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use serde::Serialize;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::state::LiveState;
use crate::{
    error::PlaybackErr,
    gate::AudioGate,
    keys,
    store::{ChunkStore, ChunkStoreExt},
    utils::sched::{task, Scheduler, SingleFlight, TaskHandle},
};

/// How far below `latestSeq` a catch-up lands. 0 = the newest chunk only.
pub const SKIP_TARGET_LAG: i64 = 0;

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub poll_every: Duration,
    pub backlog_threshold: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self { poll_every: Duration::from_millis(600), backlog_threshold: 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Waiting,
    Streaming,
    Draining,
}

#[derive(Debug, Clone)]
pub struct QueuedChunk {
    pub seq: u64,
    pub mime: String,
    pub bytes: Bytes,
}

/// Where chunks are actually played.
///
/// `play` only starts playback; the sink reports completion with a
/// [`SinkEvent`] (or a direct [`LivePlayer::chunk_ended`] call).
pub trait ChunkSink: Send {
    fn play(&mut self, chunk: QueuedChunk, muted: bool) -> Result<(), PlaybackErr>;

    /// Must not restart or seek what is playing.
    fn set_muted(&mut self, muted: bool);

    /// Pauses and releases whatever is playing.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    Ended(u64),
    Failed(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Previous poll still in flight.
    Skipped,
    Idle,
    Waiting,
    /// The stream just went inactive and local state was dropped.
    Ended,
    Paused,
    /// Transport error; next tick is the retry.
    Failed,
    /// Player was stopped or switched rooms mid-poll.
    Stale,
    Fetched { fetched: usize, skipped_to: Option<u64> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub phase: Phase,
    pub room: Option<String>,
    pub last_seq: i64,
    pub queued: Vec<u64>,
    pub playing: Option<u64>,
    pub muted: bool,
    pub polling: bool,
}

struct PlayerState {
    room: Option<String>,
    phase: Phase,
    last_seq: i64,
    queue: VecDeque<QueuedChunk>,
    playing: Option<u64>,
    muted: bool,
    generation: u64,
    sink: Box<dyn ChunkSink>,
    poll: Option<TaskHandle>,
}

impl PlayerState {
    /* 清空佇列、停掉正在播的 */
    fn release(&mut self) {
        self.queue.clear();
        self.playing = None;
        self.sink.stop();
    }

    fn reset(&mut self) {
        self.release();
        self.last_seq = -1;
    }

    fn sync_mute(&mut self, enabled: bool) {
        let muted = !enabled;
        if muted != self.muted {
            self.muted = muted;
            self.sink.set_muted(muted);
        }
    }

    fn kick(&mut self) {
        if self.playing.is_some() {
            return;
        }
        while let Some(chunk) = self.queue.pop_front() {
            let seq = chunk.seq;
            match self.sink.play(chunk, self.muted) {
                Ok(()) => {
                    self.playing = Some(seq);
                    return;
                }
                Err(e) => debug!(seq, error = %e, "chunk would not play, skipping"),
            }
        }
    }
}

pub struct LivePlayer {
    store: Arc<dyn ChunkStore>,
    sched: Arc<dyn Scheduler>,
    gate: AudioGate,
    cfg: PlayerConfig,
    in_flight: SingleFlight,
    state: Mutex<PlayerState>,
}

impl LivePlayer {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        sched: Arc<dyn Scheduler>,
        gate: AudioGate,
        cfg: PlayerConfig,
        sink: Box<dyn ChunkSink>,
    ) -> Arc<Self> {
        let muted = !gate.is_enabled();
        Arc::new(Self {
            store,
            sched,
            gate,
            cfg,
            in_flight: SingleFlight::default(),
            state: Mutex::new(PlayerState {
                room: None,
                phase: Phase::Idle,
                last_seq: -1,
                queue: VecDeque::new(),
                playing: None,
                muted,
                generation: 0,
                sink,
                poll: None,
            }),
        })
    }

    /// Subscribes to `room_id` (dropping any previous room) and runs the
    /// first poll right away.
    pub async fn start(self: &Arc<Self>, room_id: &str) -> PollOutcome {
        {
            let mut st = self.state.lock().await;
            if let Some(mut h) = st.poll.take() {
                h.cancel();
            }
            self.in_flight.reset();
            st.generation += 1;
            st.reset();
            st.room = Some(room_id.to_string());
            st.phase = Phase::Waiting;

            let weak = Arc::downgrade(self);
            st.poll = Some(self.sched.schedule(
                self.cfg.poll_every,
                task(move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(player) = weak.upgrade() {
                            player.poll().await;
                        }
                    }
                }),
            ));
            info!(room = room_id, "listening for live stream");
        }
        self.poll().await
    }

    /// Unsubscribes and releases everything. Idempotent.
    pub async fn stop(&self) {
        let mut st = self.state.lock().await;
        if let Some(mut h) = st.poll.take() {
            h.cancel();
        }
        self.in_flight.reset();
        st.generation += 1;
        st.reset();
        if st.room.take().is_some() {
            info!("stopped listening");
        }
        st.phase = Phase::Idle;
    }

    pub async fn poll(&self) -> PollOutcome {
        let Some(_flight) = self.in_flight.try_enter() else {
            return PollOutcome::Skipped;
        };

        let (room, gen) = {
            let st = self.state.lock().await;
            match &st.room {
                Some(r) => (r.clone(), st.generation),
                None => return PollOutcome::Idle,
            }
        };

        let live: Option<LiveState> = match self.store.get_json(&keys::live_state(&room)).await {
            Ok(v) => v,
            Err(e) => {
                warn!(room, error = %e, "live poll failed");
                return PollOutcome::Failed;
            }
        };

        let mut st = self.state.lock().await;
        if st.generation != gen {
            return PollOutcome::Stale;
        }
        st.sync_mute(self.gate.is_enabled());

        let live = match live {
            Some(l) if l.active => l,
            _ => {
                if st.phase == Phase::Streaming || st.last_seq >= 0 {
                    st.phase = Phase::Draining;
                    st.reset();
                    info!(room, "live stream ended");
                    st.phase = Phase::Waiting;
                    return PollOutcome::Ended;
                }
                st.phase = Phase::Waiting;
                return PollOutcome::Waiting;
            }
        };

        st.phase = Phase::Streaming;
        if live.paused {
            return PollOutcome::Paused;
        }

        let latest = live.seq;
        if latest < 0 {
            return PollOutcome::Fetched { fetched: 0, skipped_to: None };
        }
        if latest < st.last_seq {
            // 序號倒退：對方重開了一場，沒被我們看到 active=false
            info!(room, latest, last = st.last_seq, "sequence restarted");
            st.reset();
        }

        let mut next = st.last_seq + 1;
        let mut skipped_to = None;
        if latest - next > self.cfg.backlog_threshold as i64 {
            let target = (latest - SKIP_TARGET_LAG).max(next);
            info!(room, from = next, to = target, "behind live, skipping ahead");
            st.release();
            st.last_seq = target - 1;
            next = target;
            skipped_to = Some(target as u64);
        }
        drop(st);

        let mut fetched = 0;
        while next <= latest {
            let bytes = match self.store.get(&keys::live_chunk(&room, next as u64)).await {
                Ok(Some(b)) => b,
                Ok(None) => {
                    debug!(seq = next, "chunk not there (yet / anymore)");
                    break;
                }
                Err(e) => {
                    warn!(seq = next, error = %e, "chunk fetch failed");
                    break;
                }
            };
            let mut st = self.state.lock().await;
            if st.generation != gen {
                return PollOutcome::Stale;
            }
            st.queue.push_back(QueuedChunk {
                seq: next as u64,
                mime: live.mime_type.clone(),
                bytes: Bytes::from(bytes),
            });
            st.last_seq = next;
            next += 1;
            fetched += 1;
        }

        let mut st = self.state.lock().await;
        if st.generation != gen {
            return PollOutcome::Stale;
        }
        st.kick();
        PollOutcome::Fetched { fetched, skipped_to }
    }

    /// The sink finished `seq`; start the next queued chunk.
    pub async fn chunk_ended(&self, seq: u64) {
        let mut st = self.state.lock().await;
        if st.playing != Some(seq) {
            return;
        }
        st.playing = None;
        st.kick();
    }

    pub async fn chunk_failed(&self, seq: u64) {
        debug!(seq, "chunk playback error");
        self.chunk_ended(seq).await;
    }

    /// Applies the audio gate to the sink now instead of at the next poll.
    pub async fn refresh_mute(&self) {
        self.state.lock().await.sync_mute(self.gate.is_enabled());
    }

    pub fn spawn_event_pump(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<SinkEvent>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                let Some(player) = weak.upgrade() else { break };
                match ev {
                    SinkEvent::Ended(seq) => player.chunk_ended(seq).await,
                    SinkEvent::Failed(seq) => player.chunk_failed(seq).await,
                }
            }
        })
    }

    pub async fn snapshot(&self) -> PlayerSnapshot {
        let st = self.state.lock().await;
        PlayerSnapshot {
            phase: st.phase,
            room: st.room.clone(),
            last_seq: st.last_seq,
            queued: st.queue.iter().map(|c| c.seq).collect(),
            playing: st.playing,
            muted: st.muted,
            polling: st.poll.is_some(),
        }
    }
}
