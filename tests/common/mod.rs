#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use echocast::{
    bus::BusMessage,
    error::{AppResult, CaptureErr, PlaybackErr},
    keys,
    live::{CaptureProvider, CaptureSource, ChunkSink, LiveState, QueuedChunk},
    ondemand::{MediaElement, MediaPayload},
    store::{ChunkStore, MemoryStore, Op},
};
use tokio::sync::broadcast;

pub fn chunk_bytes(seq: u64) -> Vec<u8> {
    format!("chunk-{seq}").into_bytes()
}

/* ------------ 擷取：照劇本吐 chunk ------------ */
#[derive(Debug, Clone)]
pub enum Script {
    /// `n` chunks, then the tracks end.
    Chunks(u64),
    /// Chunks forever.
    Endless,
    Fail(CaptureErr),
    Silent,
}

pub struct ScriptedProvider(pub Script);

struct ScriptedSource {
    left: Option<u64>,
    produced: u64,
    has_audio: bool,
    ended: bool,
}

#[async_trait]
impl CaptureSource for ScriptedSource {
    fn mime_type(&self) -> &str {
        "audio/wav"
    }

    fn has_audio(&self) -> bool {
        self.has_audio
    }

    fn tracks_ended(&self) -> bool {
        self.ended
    }

    async fn record(&mut self, len: Duration) -> AppResult<Option<Vec<u8>>> {
        tokio::time::sleep(len).await;
        if self.left == Some(0) {
            self.ended = true;
            return Ok(None);
        }
        if let Some(n) = self.left.as_mut() {
            *n -= 1;
        }
        let bytes = chunk_bytes(self.produced);
        self.produced += 1;
        Ok(Some(bytes))
    }

    fn stop(&mut self) {
        self.ended = true;
    }
}

#[async_trait]
impl CaptureProvider for ScriptedProvider {
    async fn open(&self) -> Result<Box<dyn CaptureSource>, CaptureErr> {
        let (left, has_audio) = match &self.0 {
            Script::Chunks(n) => (Some(*n), true),
            Script::Endless => (None, true),
            Script::Silent => (None, false),
            Script::Fail(e) => return Err(e.clone()),
        };
        Ok(Box::new(ScriptedSource { left, produced: 0, has_audio, ended: false }))
    }
}

/// Waits for the next `STATE_UPDATE` matching `pred`.
pub async fn wait_state(
    rx: &mut broadcast::Receiver<BusMessage>,
    pred: impl Fn(bool, bool, u64) -> bool,
) -> (bool, bool, u64) {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(BusMessage::StateUpdate { streaming, paused, elapsed }) if pred(streaming, paused, elapsed) => {
                    return (streaming, paused, elapsed)
                }
                Ok(_) => continue,
                Err(e) => panic!("bus closed: {e}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), wait).await.expect("state update never came")
}

/* ------------ 直接寫 store，模擬廣播端 ------------ */
pub async fn publish(store: &MemoryStore, room: &str, seq: u64) {
    let state = LiveState { active: true, paused: false, seq: seq as i64, mime_type: "audio/webm".into(), ts: 0 };
    store
        .batch(vec![
            Op::put_bytes(keys::live_chunk(room, seq), &chunk_bytes(seq), 30),
            Op::put_json(keys::live_state(room), &state, 1500).unwrap(),
        ])
        .await
        .unwrap();
}

pub async fn set_live(store: &MemoryStore, room: &str, state: LiveState) {
    store.put_raw(&keys::live_state(room), serde_json::to_string(&state).unwrap(), 1500).await.unwrap();
}

pub fn chunk_reads(reads: &[String], room: &str) -> Vec<u64> {
    let prefix = format!("room:chunk:{room}:");
    reads.iter().filter_map(|k| k.strip_prefix(&prefix)?.parse().ok()).collect()
}

/* ------------ 記錄播放的 sink ------------ */
#[derive(Debug, Default)]
pub struct SinkLog {
    pub played: Vec<(u64, bool)>,
    pub stops: usize,
    pub mutes: Vec<bool>,
    pub undecodable: Vec<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingSink(pub Arc<Mutex<SinkLog>>);

impl RecordingSink {
    pub fn log(&self) -> MutexGuard<'_, SinkLog> {
        self.0.lock().unwrap()
    }

    pub fn played(&self) -> Vec<u64> {
        self.log().played.iter().map(|(s, _)| *s).collect()
    }
}

impl ChunkSink for RecordingSink {
    fn play(&mut self, chunk: QueuedChunk, muted: bool) -> Result<(), PlaybackErr> {
        let mut log = self.log();
        if log.undecodable.contains(&chunk.seq) {
            return Err(PlaybackErr::Decode(format!("chunk {}", chunk.seq)));
        }
        log.played.push((chunk.seq, muted));
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) {
        self.log().mutes.push(muted);
    }

    fn stop(&mut self) {
        self.log().stops += 1;
    }
}

/* ------------ 假的 media element ------------ */
#[derive(Debug, Default)]
pub struct MediaLog {
    pub loads: Vec<String>,
    pub duration: Option<f64>,
    pub time: f64,
    pub playing: bool,
    pub seeks: Vec<f64>,
    pub plays: usize,
    pub pauses: usize,
    pub reject_plays: usize,
    pub reject_loads: bool,
}

#[derive(Debug, Clone)]
pub struct FakeMedia {
    pub log: Arc<Mutex<MediaLog>>,
    length: f64,
}

impl FakeMedia {
    pub fn new(length: f64) -> Self {
        Self { log: Arc::default(), length }
    }

    pub fn log(&self) -> MutexGuard<'_, MediaLog> {
        self.log.lock().unwrap()
    }
}

#[async_trait]
impl MediaElement for FakeMedia {
    async fn load(&mut self, media: &MediaPayload) -> Result<(), PlaybackErr> {
        let mut log = self.log();
        log.loads.push(media.mime.clone());
        if log.reject_loads {
            return Err(PlaybackErr::Decode("cannot decode".into()));
        }
        log.duration = Some(self.length);
        log.time = 0.0;
        log.playing = false;
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        self.log().duration
    }

    fn current_time(&self) -> f64 {
        self.log().time
    }

    fn seek(&mut self, to: f64) {
        let mut log = self.log();
        log.seeks.push(to);
        log.time = to;
    }

    fn is_paused(&self) -> bool {
        !self.log().playing
    }

    async fn play(&mut self) -> Result<(), PlaybackErr> {
        let mut log = self.log();
        if log.reject_plays > 0 {
            log.reject_plays -= 1;
            return Err(PlaybackErr::Rejected("autoplay blocked".into()));
        }
        log.plays += 1;
        log.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        let mut log = self.log();
        if log.playing {
            log.pauses += 1;
        }
        log.playing = false;
    }

    fn unload(&mut self) {
        let mut log = self.log();
        log.duration = None;
        log.time = 0.0;
        log.playing = false;
    }
}
