// 上傳的檔案以 data URI 文字存放，切成多個 key + 一筆 meta。
// meta 最後寫，讀者看到 meta 時 chunk 都已就位。

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use bytes::Bytes;
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{StoreErr, StoreResult},
    keys,
    store::{ChunkStore, ChunkStoreExt},
};

pub const CHUNK_SIZE: usize = 500 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMeta {
    pub total_chunks: usize,
    pub total_length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub mime: String,
    pub bytes: Bytes,
}

impl MediaPayload {
    pub fn new(mime: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self { mime: mime.into(), bytes: bytes.into() }
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, B64.encode(&self.bytes))
    }

    pub fn from_data_uri(uri: &str) -> StoreResult<Self> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| StoreErr::Decode("not a data URI".into()))?;
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| StoreErr::Decode("data URI without payload".into()))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| StoreErr::Decode("data URI is not base64".into()))?;
        let bytes = B64.decode(data).map_err(|e| StoreErr::Decode(e.to_string()))?;
        let mime = if mime.is_empty() { "application/octet-stream" } else { mime };
        Ok(Self::new(mime, bytes))
    }
}

fn split_text(s: &str, size: usize) -> Vec<&str> {
    let size = size.max(4);
    let mut out = Vec::with_capacity(s.len() / size + 1);
    let mut start = 0;
    while start < s.len() {
        let mut end = (start + size).min(s.len());
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        out.push(&s[start..end]);
        start = end;
    }
    out
}

pub async fn upload(
    store: &dyn ChunkStore,
    room_id: &str,
    payload: &MediaPayload,
    chunk_size: usize,
    ttl: u64,
) -> StoreResult<PayloadMeta> {
    let uri = payload.to_data_uri();
    let parts = split_text(&uri, chunk_size);
    let meta = PayloadMeta { total_chunks: parts.len(), total_length: uri.len() };

    let writes = parts.iter().enumerate().map(|(i, part)| {
        let key = keys::audio_data(room_id, i);
        async move {
            let raw = serde_json::to_string(part)?;
            store.put_raw(&key, raw, ttl).await
        }
    });
    try_join_all(writes).await?;

    store.put_json(&keys::audio_meta(room_id), &meta, ttl).await?;
    debug!(room = room_id, chunks = meta.total_chunks, len = meta.total_length, "payload uploaded");
    Ok(meta)
}

/// `Ok(None)` while the payload is absent or only partly visible.
pub async fn download(store: &dyn ChunkStore, room_id: &str) -> StoreResult<Option<MediaPayload>> {
    let meta: Option<PayloadMeta> = store.get_json(&keys::audio_meta(room_id)).await?;
    let Some(meta) = meta else { return Ok(None) };

    let reads = (0..meta.total_chunks).map(|i| {
        let key = keys::audio_data(room_id, i);
        async move { store.get_raw(&key).await }
    });
    let parts = try_join_all(reads).await?;

    let mut uri = String::with_capacity(meta.total_length);
    for (i, part) in parts.into_iter().enumerate() {
        let Some(raw) = part else {
            debug!(room = room_id, chunk = i, "payload chunk missing");
            return Ok(None);
        };
        let text: String = serde_json::from_str(&raw)?;
        uri.push_str(&text);
    }
    if uri.len() != meta.total_length {
        debug!(room = room_id, got = uri.len(), want = meta.total_length, "payload length mismatch");
        return Ok(None);
    }
    MediaPayload::from_data_uri(&uri).map(Some)
}
