use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt},
    time::{self, Instant},
};
use tracing::debug;

use super::wav::{self, PcmFormat};
use crate::error::{AppResult, CaptureErr};

/// A live audio capture that yields one self-contained chunk per call.
#[async_trait]
pub trait CaptureSource: Send {
    fn mime_type(&self) -> &str;

    fn has_audio(&self) -> bool;

    /// All audio tracks have ended ("user stopped sharing").
    fn tracks_ended(&self) -> bool;

    /// Records about `len` of audio as an independently decodable chunk.
    /// `Ok(None)` once the capture has nothing more to give.
    async fn record(&mut self, len: Duration) -> AppResult<Option<Vec<u8>>>;

    fn stop(&mut self);
}

/// Opens a capture, i.e. the permission prompt / source picker.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CaptureSource>, CaptureErr>;
}

/* ------------ 從 PCM 串流擷取 ------------ */
pub struct PcmCapture<R> {
    reader: R,
    fmt: PcmFormat,
    paced: bool,
    ended: bool,
}

impl<R> PcmCapture<R> {
    /// `paced` holds each segment back to real time, for sources that read
    /// faster than they play (files).
    pub fn new(reader: R, fmt: PcmFormat, paced: bool) -> Self {
        Self { reader, fmt, paced, ended: false }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> CaptureSource for PcmCapture<R> {
    fn mime_type(&self) -> &str {
        wav::MIME
    }

    fn has_audio(&self) -> bool {
        self.fmt.channels > 0 && self.fmt.sample_rate > 0
    }

    fn tracks_ended(&self) -> bool {
        self.ended
    }

    async fn record(&mut self, len: Duration) -> AppResult<Option<Vec<u8>>> {
        if self.ended {
            return Ok(None);
        }
        let started = Instant::now();
        let want = self.fmt.bytes_for(len);
        let mut pcm = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self.reader.read(&mut pcm[filled..]).await?;
            if n == 0 {
                debug!(filled, "capture reached end of input");
                self.ended = true;
                break;
            }
            filled += n;
        }
        pcm.truncate(filled - filled % self.fmt.bytes_per_frame().max(1));
        if pcm.is_empty() {
            return Ok(None);
        }
        if self.paced {
            time::sleep_until(started + len).await;
        }
        Ok(Some(wav::encode(self.fmt, &pcm)))
    }

    fn stop(&mut self) {
        self.ended = true;
    }
}

/// Opens a PCM file, or stdin when no path is given.
#[derive(Debug, Clone)]
pub struct PcmFileProvider {
    path: Option<PathBuf>,
    fmt: PcmFormat,
}

impl PcmFileProvider {
    pub fn new(path: Option<PathBuf>, fmt: PcmFormat) -> Self {
        Self { path, fmt }
    }
}

#[async_trait]
impl CaptureProvider for PcmFileProvider {
    async fn open(&self) -> Result<Box<dyn CaptureSource>, CaptureErr> {
        if self.fmt.channels == 0 {
            return Err(CaptureErr::NoAudio);
        }
        match &self.path {
            None => Ok(Box::new(PcmCapture::new(tokio::io::stdin(), self.fmt, false))),
            Some(path) => {
                let file = File::open(path).await.map_err(|e| {
                    CaptureErr::Denied(format!("Could not capture audio from {}: {e}", path.display()))
                })?;
                Ok(Box::new(PcmCapture::new(file, self.fmt, true)))
            }
        }
    }
}
