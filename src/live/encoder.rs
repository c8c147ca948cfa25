//! Broadcaster side of a live stream.
//!
//! One capture segment per cycle, each a complete file, numbered from 0.
//! Chunks and state records go out through a single ordered publisher so a
//! late chunk upload can never overwrite a newer pause/stop record.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use serde::Serialize;
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use super::{
    capture::{CaptureProvider, CaptureSource},
    state::LiveState,
};
use crate::{
    bus::{BusMessage, ControlBus, Subscription},
    error::{AppErr, AppResult, CaptureErr},
    keys,
    store::{ChunkStore, ChunkStoreExt, Op},
    utils::{
        clock::Clock,
        sched::{task, Scheduler, TaskHandle},
    },
};

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub cycle: Duration,
    pub chunk_ttl: u64,
    pub state_ttl: u64,
    /// How long stop waits for queued uploads before giving up on them.
    pub drain_timeout: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            cycle: Duration::from_millis(500),
            chunk_ttl: keys::CHUNK_TTL,
            state_ttl: keys::STATE_TTL,
            drain_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub streaming: bool,
    pub paused: bool,
    pub elapsed: u64,
    pub last_seq: i64,
    pub room: Option<String>,
    pub permission_error: Option<String>,
}

enum Outbound {
    Chunk { seq: u64, bytes: Vec<u8>, paused: bool },
    State(LiveState),
}

/* ------------ 一次直播的狀態 ------------ */
#[derive(Default)]
struct Session {
    room: Option<String>,
    mime: String,
    streaming: bool,
    paused: bool,
    elapsed: u64,
    next_seq: u64,
    permission_error: Option<String>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    pause_tx: Option<watch::Sender<bool>>,
    encoder: Option<JoinHandle<()>>,
    publisher: Option<JoinHandle<()>>,
    timer: Option<TaskHandle>,
}

impl Session {
    fn last_seq(&self) -> i64 {
        self.next_seq as i64 - 1
    }

    fn state_msg(&self) -> BusMessage {
        BusMessage::StateUpdate { streaming: self.streaming, paused: self.paused, elapsed: self.elapsed }
    }

    fn live_state(&self, active: bool, paused: bool, ts: i64) -> LiveState {
        LiveState { active, paused, seq: self.last_seq(), mime_type: self.mime.clone(), ts }
    }
}

#[derive(Clone)]
pub struct LiveBroadcaster {
    store: Arc<dyn ChunkStore>,
    clock: Arc<dyn Clock>,
    sched: Arc<dyn Scheduler>,
    bus: ControlBus,
    cfg: LiveConfig,
    session: Arc<Mutex<Session>>,
}

impl LiveBroadcaster {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        clock: Arc<dyn Clock>,
        sched: Arc<dyn Scheduler>,
        bus: ControlBus,
        cfg: LiveConfig,
    ) -> Self {
        Self { store, clock, sched, bus, cfg, session: Arc::default() }
    }

    pub async fn status(&self) -> LiveStatus {
        let s = self.session.lock().await;
        LiveStatus {
            streaming: s.streaming,
            paused: s.paused,
            elapsed: s.elapsed,
            last_seq: s.last_seq(),
            room: s.room.clone(),
            permission_error: s.permission_error.clone(),
        }
    }

    /// `Ok(false)` when the operator cancelled the source picker.
    pub async fn start(&self, room: &str, provider: &dyn CaptureProvider) -> AppResult<bool> {
        {
            let mut s = self.session.lock().await;
            if s.streaming {
                return Err(AppErr::Bad("already live".into()));
            }
            s.permission_error = None;
        }

        let mut source = match provider.open().await {
            Ok(src) => src,
            Err(CaptureErr::Cancelled) => {
                debug!(room, "capture picker cancelled");
                return Ok(false);
            }
            Err(e) => return Err(self.capture_failed(e).await),
        };
        if !source.has_audio() {
            source.stop();
            return Err(self.capture_failed(CaptureErr::NoAudio).await);
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (pause_tx, pause_rx) = watch::channel(false);

        let mut s = self.session.lock().await;
        if s.streaming {
            source.stop();
            return Err(AppErr::Bad("already live".into()));
        }
        *s = Session {
            room: Some(room.to_string()),
            mime: source.mime_type().to_string(),
            streaming: true,
            outbound: Some(out_tx.clone()),
            pause_tx: Some(pause_tx),
            ..Session::default()
        };

        let publisher = Publisher {
            store: self.store.clone(),
            clock: self.clock.clone(),
            room: room.to_string(),
            mime: s.mime.clone(),
            cfg: self.cfg.clone(),
        };
        s.publisher = Some(tokio::spawn(publisher.run(out_rx)));
        s.encoder = Some(tokio::spawn(self.clone().encode(source, out_tx, pause_rx)));
        s.timer = Some(self.start_timer());

        info!(room, mime = %s.mime, "live stream started");
        self.bus.publish(s.state_msg());
        Ok(true)
    }

    async fn capture_failed(&self, e: CaptureErr) -> AppErr {
        let msg = e.to_string();
        warn!(error = %msg, "could not start capture");
        self.session.lock().await.permission_error = Some(msg.clone());
        AppErr::Capture(msg)
    }

    pub async fn pause(&self) {
        let mut s = self.session.lock().await;
        if !s.streaming || s.paused {
            return;
        }
        s.paused = true;
        if let Some(tx) = &s.pause_tx {
            tx.send(true).ok();
        }
        if let Some(mut t) = s.timer.take() {
            t.cancel();
        }
        // 通知聽眾暫停，盡力而為
        let state = s.live_state(true, true, self.clock.now_ms());
        if let Some(tx) = &s.outbound {
            tx.send(Outbound::State(state)).ok();
        }
        info!(room = ?s.room, "live stream paused");
        self.bus.publish(s.state_msg());
    }

    pub async fn resume(&self) {
        let mut s = self.session.lock().await;
        if !s.streaming || !s.paused {
            return;
        }
        s.paused = false;
        if let Some(tx) = &s.pause_tx {
            tx.send(false).ok();
        }
        s.timer = Some(self.start_timer());
        info!(room = ?s.room, "live stream resumed");
        self.bus.publish(s.state_msg());
    }

    /// Safe to call in any state, any number of times.
    pub async fn stop(&self) {
        self.finish(true).await;
    }

    /// Answers the companion window's commands until the subscription drops.
    pub fn serve_commands(&self) -> Subscription {
        let me = self.clone();
        self.bus.subscribe(move |msg| {
            let me = me.clone();
            async move {
                match msg {
                    BusMessage::CmdPause => me.pause().await,
                    BusMessage::CmdResume => me.resume().await,
                    BusMessage::CmdStop => me.stop().await,
                    BusMessage::CmdRequestState => me.announce().await,
                    BusMessage::StateUpdate { .. } => {}
                }
            }
        })
    }

    pub async fn announce(&self) {
        let msg = self.session.lock().await.state_msg();
        self.bus.publish(msg);
    }

    fn start_timer(&self) -> TaskHandle {
        let session: Weak<Mutex<Session>> = Arc::downgrade(&self.session);
        let bus = self.bus.clone();
        self.sched.schedule(
            Duration::from_secs(1),
            task(move || {
                let session = session.clone();
                let bus = bus.clone();
                async move {
                    let Some(session) = session.upgrade() else { return };
                    let mut s = session.lock().await;
                    if !s.streaming || s.paused {
                        return;
                    }
                    s.elapsed += 1;
                    bus.publish(s.state_msg());
                }
            }),
        )
    }

    async fn encode(
        self,
        mut source: Box<dyn CaptureSource>,
        tx: mpsc::UnboundedSender<Outbound>,
        mut pause_rx: watch::Receiver<bool>,
    ) {
        loop {
            // 暫停時擷取仍開著，只是不出 chunk
            loop {
                let paused = *pause_rx.borrow_and_update();
                if !paused {
                    break;
                }
                if pause_rx.changed().await.is_err() {
                    source.stop();
                    return;
                }
            }
            if source.tracks_ended() {
                break;
            }

            match source.record(self.cfg.cycle).await {
                Ok(Some(bytes)) if bytes.is_empty() => continue,
                Ok(Some(bytes)) => {
                    let (seq, paused) = {
                        let mut s = self.session.lock().await;
                        if !s.streaming {
                            break;
                        }
                        let seq = s.next_seq;
                        s.next_seq += 1;
                        (seq, s.paused)
                    };
                    if tx.send(Outbound::Chunk { seq, bytes, paused }).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "capture read failed");
                    break;
                }
            }
        }

        source.stop();
        drop(tx);
        if source.tracks_ended() {
            info!("capture ended, stopping stream");
        }
        self.finish(false).await;
    }

    // by_user = false：從 encoder 自己呼叫，不能 abort 自己
    async fn finish(&self, by_user: bool) {
        let (room, final_state, encoder, publisher, outbound, timer, pause_tx) = {
            let mut s = self.session.lock().await;
            if !s.streaming {
                return;
            }
            let final_state = s.live_state(false, false, self.clock.now_ms());
            s.streaming = false;
            s.paused = false;
            s.elapsed = 0;
            (
                s.room.clone(),
                final_state,
                s.encoder.take(),
                s.publisher.take(),
                s.outbound.take(),
                s.timer.take(),
                s.pause_tx.take(),
            )
        };

        // 先清計時器，再釋放擷取與上傳
        if let Some(mut t) = timer {
            t.cancel();
        }
        drop(pause_tx);
        if let Some(h) = encoder {
            if by_user {
                h.abort();
            }
        }
        if let Some(tx) = outbound {
            tx.send(Outbound::State(final_state.clone())).ok();
        }
        if let Some(p) = publisher {
            let abort = p.abort_handle();
            if time::timeout(self.cfg.drain_timeout, p).await.is_err() {
                warn!(room = ?room, "uploads still pending at stop, dropping them");
                abort.abort();
            }
        }

        info!(room = ?room, last_seq = final_state.seq, "live stream stopped");
        self.bus.publish(BusMessage::StateUpdate { streaming: false, paused: false, elapsed: 0 });
    }
}

/* ------------ 依序上傳 chunk 與狀態 ------------ */
struct Publisher {
    store: Arc<dyn ChunkStore>,
    clock: Arc<dyn Clock>,
    room: String,
    mime: String,
    cfg: LiveConfig,
}

impl Publisher {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Outbound>) {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Chunk { seq, bytes, paused } => self.publish_chunk(seq, &bytes, paused).await,
                Outbound::State(state) => {
                    let key = keys::live_state(&self.room);
                    if let Err(e) = self.store.put_json(&key, &state, self.cfg.state_ttl).await {
                        warn!(room = %self.room, error = %e, "live state write failed");
                    }
                }
            }
        }
    }

    // chunk + 狀態放同一個 pipeline，一次 round trip
    async fn publish_chunk(&self, seq: u64, bytes: &[u8], paused: bool) {
        let state = LiveState {
            active: true,
            paused,
            seq: seq as i64,
            mime_type: self.mime.clone(),
            ts: self.clock.now_ms(),
        };
        let state_op = match Op::put_json(keys::live_state(&self.room), &state, self.cfg.state_ttl) {
            Ok(op) => op,
            Err(e) => {
                warn!(seq, error = %e, "could not encode live state");
                return;
            }
        };
        let ops = vec![Op::put_bytes(keys::live_chunk(&self.room, seq), bytes, self.cfg.chunk_ttl), state_op];

        match self.store.batch(ops).await {
            Ok(replies) => {
                for r in replies {
                    if let Err(e) = r.into_done() {
                        warn!(seq, error = %e, "chunk upload partly failed");
                    }
                }
                debug!(seq, len = bytes.len(), "chunk published");
            }
            Err(e) => warn!(seq, error = %e, "chunk upload failed"),
        }
    }
}
