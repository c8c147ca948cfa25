use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::{Mutex, RwLock},
    time::Instant,
};

use super::{ChunkStore, Op, Reply};
use crate::error::{StoreErr, StoreResult};

struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    map: RwLock<HashMap<String, Entry>>,
    latency_ms: AtomicU64,
    offline: AtomicBool,
    round_trips: AtomicUsize,
    reads: Mutex<Vec<String>>,
}

/// In-process store with the same contract as the REST service.
///
/// Expiry follows tokio time, so paused-clock tests can age keys out.
/// Also records every read key and round trip for assertions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.inner.latency_ms.store(latency.as_millis() as u64, Ordering::Relaxed);
        self
    }

    /// 斷線模擬：每個 round trip 都回傳傳輸錯誤
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::Relaxed);
    }

    pub fn round_trips(&self) -> usize {
        self.inner.round_trips.load(Ordering::Relaxed)
    }

    pub async fn reads(&self) -> Vec<String> {
        self.inner.reads.lock().await.clone()
    }

    pub async fn clear_reads(&self) {
        self.inner.reads.lock().await.clear();
    }

    pub async fn contains(&self, key: &str) -> bool {
        let map = self.inner.map.read().await;
        map.get(key).is_some_and(|e| e.expires_at > Instant::now())
    }

    pub async fn remove(&self, key: &str) {
        self.inner.map.write().await.remove(key);
    }

    /// Seconds left before `key` expires.
    pub async fn ttl(&self, key: &str) -> Option<u64> {
        let map = self.inner.map.read().await;
        let e = map.get(key)?;
        e.expires_at.checked_duration_since(Instant::now()).map(|d| d.as_secs())
    }

    async fn round_trip(&self) -> StoreResult<()> {
        self.inner.round_trips.fetch_add(1, Ordering::Relaxed);
        let ms = self.inner.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if self.inner.offline.load(Ordering::Relaxed) {
            return Err(StoreErr::Status { status: 503, body: "offline".into() });
        }
        Ok(())
    }

    async fn apply(&self, op: Op) -> Reply {
        match op {
            Op::Put { key, value, ttl } => {
                let expires_at = Instant::now() + Duration::from_secs(ttl);
                self.inner.map.write().await.insert(key, Entry { value, expires_at });
                Reply::Done
            }
            Op::Get { key } => {
                let now = Instant::now();
                let value = {
                    let mut map = self.inner.map.write().await;
                    match map.get(&key) {
                        Some(e) if e.expires_at > now => Some(e.value.clone()),
                        Some(_) => {
                            map.remove(&key);
                            None
                        }
                        None => None,
                    }
                };
                self.inner.reads.lock().await.push(key);
                Reply::Value(value)
            }
        }
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn batch(&self, ops: Vec<Op>) -> StoreResult<Vec<Reply>> {
        self.round_trip().await?;
        let mut out = Vec::with_capacity(ops.len());
        for op in ops {
            out.push(self.apply(op).await);
        }
        Ok(out)
    }

    async fn put_raw(&self, key: &str, value: String, ttl: u64) -> StoreResult<()> {
        self.round_trip().await?;
        self.apply(Op::Put { key: key.to_string(), value, ttl }).await.into_done()
    }

    async fn get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        self.round_trip().await?;
        self.apply(Op::get(key)).await.into_value()
    }
}
