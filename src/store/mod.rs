//! Chunk store adapter: opaque byte blobs and small JSON records by key,
//! every write carrying an expiry.
//!
//! Absence (expired or never written) is `Ok(None)`; transport failures are
//! `Err`. Binary payloads travel as base64 text.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::{StoreErr, StoreResult};

pub mod memory;
pub mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

/* ------------ 一次 pipeline 內的單一指令 ------------ */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Put { key: String, value: String, ttl: u64 },
    Get { key: String },
}

impl Op {
    pub fn put_bytes(key: impl Into<String>, bytes: &[u8], ttl: u64) -> Self {
        Op::Put { key: key.into(), value: B64.encode(bytes), ttl }
    }

    pub fn put_json<T: Serialize>(key: impl Into<String>, value: &T, ttl: u64) -> StoreResult<Self> {
        Ok(Op::Put { key: key.into(), value: serde_json::to_string(value)?, ttl })
    }

    pub fn get(key: impl Into<String>) -> Self {
        Op::Get { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Op::Put { key, .. } | Op::Get { key } => key,
        }
    }
}

/// Result of one [`Op`], same position as the op in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    Value(Option<String>),
    Failed(String),
}

impl Reply {
    pub fn into_done(self) -> StoreResult<()> {
        match self {
            Reply::Failed(msg) => Err(StoreErr::Command(msg)),
            _ => Ok(()),
        }
    }

    pub fn into_value(self) -> StoreResult<Option<String>> {
        match self {
            Reply::Value(v) => Ok(v),
            Reply::Done => Ok(None),
            Reply::Failed(msg) => Err(StoreErr::Command(msg)),
        }
    }

    pub fn into_bytes(self) -> StoreResult<Option<Vec<u8>>> {
        self.into_value()?.map(|s| decode_bytes(&s)).transpose()
    }
}

pub fn decode_bytes(raw: &str) -> StoreResult<Vec<u8>> {
    B64.decode(raw).map_err(|e| StoreErr::Decode(e.to_string()))
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Several commands in one round trip, replies in the same order.
    async fn batch(&self, ops: Vec<Op>) -> StoreResult<Vec<Reply>>;

    async fn put_raw(&self, key: &str, value: String, ttl: u64) -> StoreResult<()>;

    async fn get_raw(&self, key: &str) -> StoreResult<Option<String>>;

    async fn put(&self, key: &str, bytes: &[u8], ttl: u64) -> StoreResult<()> {
        self.put_raw(key, B64.encode(bytes), ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.get_raw(key).await?.map(|s| decode_bytes(&s)).transpose()
    }
}

/* ------------ JSON 記錄 ------------ */
#[async_trait]
pub trait ChunkStoreExt: ChunkStore {
    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: u64) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        self.put_raw(key, raw, ttl).await
    }

    /// Unparsable records read as absent.
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> StoreResult<Option<T>> {
        let Some(raw) = self.get_raw(key).await? else { return Ok(None) };
        match serde_json::from_str(&raw) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                warn!(key, error = %e, "corrupt record, treating as absent");
                Ok(None)
            }
        }
    }
}

impl<S: ChunkStore + ?Sized> ChunkStoreExt for S {}
