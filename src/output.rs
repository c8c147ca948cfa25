// 無頭 listener 的輸出：把播放的 chunk / 分享檔寫進資料夾。

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tracing::{debug, warn};

use crate::{
    error::PlaybackErr,
    live::{wav, ChunkSink, QueuedChunk, SinkEvent},
    ondemand::{MediaElement, MediaPayload},
};

/// Play time assumed for chunks whose length cannot be read from the bytes.
pub const FALLBACK_CHUNK_LEN: Duration = Duration::from_millis(500);

fn extension(mime: &str) -> &'static str {
    let essence = mime.split(';').next().unwrap_or(mime).trim();
    if essence == wav::MIME {
        return "wav";
    }
    mime_guess::get_mime_extensions_str(essence)
        .and_then(|exts| exts.first().copied())
        .unwrap_or("bin")
}

fn play_length(chunk: &QueuedChunk) -> Result<Duration, PlaybackErr> {
    if chunk.mime.starts_with(wav::MIME) {
        return wav::duration(&chunk.bytes).ok_or_else(|| PlaybackErr::Decode(format!("chunk {} is not a WAV file", chunk.seq)));
    }
    Ok(FALLBACK_CHUNK_LEN)
}

/* ------------ live chunk → 檔案 ------------ */
/// Writes each played chunk as `live-<seq>.<ext>` and reports it ended after
/// its play length. Muted chunks are timed but not written.
pub struct DirSink {
    dir: PathBuf,
    events: mpsc::UnboundedSender<SinkEvent>,
    current: Option<JoinHandle<()>>,
}

impl DirSink {
    pub fn new(dir: impl Into<PathBuf>) -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { dir: dir.into(), events, current: None }, rx)
    }

    pub fn chunk_path(&self, chunk: &QueuedChunk) -> PathBuf {
        self.dir.join(format!("live-{:06}.{}", chunk.seq, extension(&chunk.mime)))
    }
}

impl ChunkSink for DirSink {
    fn play(&mut self, chunk: QueuedChunk, muted: bool) -> Result<(), PlaybackErr> {
        let len = play_length(&chunk)?;
        let path = (!muted).then(|| self.chunk_path(&chunk));
        let events = self.events.clone();
        let seq = chunk.seq;

        self.current = Some(tokio::spawn(async move {
            if let Some(path) = path {
                if let Err(e) = tokio::fs::write(&path, &chunk.bytes).await {
                    warn!(seq, path = %path.display(), error = %e, "could not write chunk");
                    events.send(SinkEvent::Failed(seq)).ok();
                    return;
                }
            }
            tokio::time::sleep(len).await;
            events.send(SinkEvent::Ended(seq)).ok();
        }));
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) {
        // 正在播的那段照舊，下一段才生效
        debug!(muted, "output mute changed");
    }

    fn stop(&mut self) {
        if let Some(h) = self.current.take() {
            h.abort();
        }
    }
}

/* ------------ 分享檔：虛擬播放頭 ------------ */
/// Media element without audio output: keeps a play-head on the tokio clock
/// and writes the loaded file to `dir` (if set).
#[derive(Debug, Default)]
pub struct VirtualMedia {
    dir: Option<PathBuf>,
    loaded: Option<PathBuf>,
    duration: Option<f64>,
    anchor: f64,
    started: Option<Instant>,
}

impl VirtualMedia {
    pub fn new(dir: Option<&Path>) -> Self {
        Self { dir: dir.map(Path::to_path_buf), ..Self::default() }
    }

    /// Where the last loaded file was written.
    pub fn file(&self) -> Option<&Path> {
        self.loaded.as_deref()
    }

    fn raw_time(&self) -> f64 {
        match self.started {
            Some(at) => self.anchor + at.elapsed().as_secs_f64(),
            None => self.anchor,
        }
    }
}

#[async_trait]
impl MediaElement for VirtualMedia {
    async fn load(&mut self, media: &MediaPayload) -> Result<(), PlaybackErr> {
        self.unload();
        if media.mime.starts_with(wav::MIME) {
            let len = wav::duration(&media.bytes).ok_or_else(|| PlaybackErr::Decode("shared file is not a WAV file".into()))?;
            self.duration = Some(len.as_secs_f64());
        }
        let path = match &self.dir {
            Some(dir) => {
                let path = dir.join(format!("shared.{}", extension(&media.mime)));
                tokio::fs::write(&path, &media.bytes)
                    .await
                    .map_err(|e| PlaybackErr::Decode(format!("could not write {}: {e}", path.display())))?;
                path
            }
            None => PathBuf::new(),
        };
        self.loaded = Some(path);
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn current_time(&self) -> f64 {
        let t = self.raw_time();
        self.duration.map_or(t, |d| t.min(d))
    }

    fn seek(&mut self, to: f64) {
        self.anchor = to.max(0.0);
        if self.started.is_some() {
            self.started = Some(Instant::now());
        }
    }

    fn is_paused(&self) -> bool {
        self.started.is_none() || self.duration.is_some_and(|d| self.raw_time() >= d)
    }

    async fn play(&mut self) -> Result<(), PlaybackErr> {
        if self.loaded.is_none() {
            return Err(PlaybackErr::Rejected("nothing loaded".into()));
        }
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.anchor = self.current_time();
        self.started = None;
    }

    fn unload(&mut self) {
        self.loaded = None;
        self.duration = None;
        self.anchor = 0.0;
        self.started = None;
    }
}
