//! Room / participant directory.
//!
//! A room is a record `{roomId, roomCode, creatorId, createdAt}` plus a list of
//! participants, both expiring after [`keys::ROOM_TTL`]. The participant list
//! is a JSON array of JSON-encoded entries; entries that do not parse are kept
//! as `{id: "unknown", name: <raw>}`.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::{
    error::{bad, AppErr, AppResult},
    keys,
    store::{ChunkStore, ChunkStoreExt},
    utils::{
        clock::Clock,
        sched::{task, Scheduler, TaskHandle},
    },
};

/// How often a member re-reads the participant list.
pub const MEMBERSHIP_POLL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub room_id: String,
    pub room_code: String,
    pub creator_id: String,
    pub created_at: i64,
}

/// What a device gets back after creating or joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomTicket {
    pub room_id: String,
    pub room_code: String,
    pub join_url: String,
    pub creator_id: String,
    pub client_id: String,
    pub is_creator: bool,
}

fn room_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

fn parse_entry(raw: &str) -> Participant {
    serde_json::from_str(raw).unwrap_or_else(|_| Participant { id: "unknown".into(), name: raw.to_string() })
}

pub struct RoomDirectory {
    store: Arc<dyn ChunkStore>,
    clock: Arc<dyn Clock>,
    public_url: String,
    client_id: String,
}

impl RoomDirectory {
    pub fn new(store: Arc<dyn ChunkStore>, clock: Arc<dyn Clock>, public_url: &str) -> Self {
        Self {
            store,
            clock,
            public_url: public_url.trim_end_matches('/').to_string(),
            client_id: format!("User-{}", nanoid::nanoid!(8)),
        }
    }

    /// Acts as an existing device identity.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn join_url(&self, room_id: &str, code: &str) -> String {
        format!("{}/join?room={room_id}&code={code}", self.public_url)
    }

    pub async fn create_room(&self, name: Option<&str>) -> AppResult<RoomTicket> {
        let record = RoomRecord {
            room_id: uuid::Uuid::new_v4().to_string(),
            room_code: room_code(),
            creator_id: self.client_id.clone(),
            created_at: self.clock.now_ms(),
        };
        self.store.put_json(&keys::room(&record.room_id), &record, keys::ROOM_TTL).await?;

        let me = Participant { id: self.client_id.clone(), name: name.unwrap_or("Admin").to_string() };
        self.add_participant(&record.room_id, &me).await?;
        info!(room = %record.room_id, "room created");
        Ok(self.ticket(&record))
    }

    pub async fn join_room(&self, room_id: &str, code: &str, name: Option<&str>) -> AppResult<RoomTicket> {
        let (room_id, code) = (room_id.trim(), code.trim());
        if room_id.is_empty() || code.is_empty() {
            return Err(bad("Room ID and code are required."));
        }
        let record = self
            .fetch(room_id)
            .await?
            .ok_or_else(|| AppErr::NotFound("Room not found or expired.".into()))?;
        if record.room_code.trim() != code {
            debug!(room = room_id, "room code mismatch");
            return Err(bad("Invalid room code. Double-check the 6-digit code and try again."));
        }

        let tail: String = {
            let chars: Vec<char> = self.client_id.chars().collect();
            chars[chars.len().saturating_sub(4)..].iter().collect()
        };
        let default_name = format!("User-{tail}");
        let me = Participant { id: self.client_id.clone(), name: name.unwrap_or(&default_name).to_string() };
        self.add_participant(room_id, &me).await?;
        Ok(self.ticket(&record))
    }

    pub async fn fetch(&self, room_id: &str) -> AppResult<Option<RoomRecord>> {
        Ok(self.store.get_json(&keys::room(room_id)).await?)
    }

    /// Deduplicated by id, last entry wins, first-seen order kept.
    pub async fn participants(&self, room_id: &str) -> AppResult<Vec<Participant>> {
        let mut out: Vec<Participant> = Vec::new();
        for p in self.raw_list(room_id).await?.iter().map(|r| parse_entry(r)) {
            match out.iter_mut().find(|q| q.id == p.id) {
                Some(q) => *q = p,
                None => out.push(p),
            }
        }
        Ok(out)
    }

    pub async fn add_participant(&self, room_id: &str, who: &Participant) -> AppResult<()> {
        let mut list = self.raw_list(room_id).await?;
        list.push(serde_json::to_string(who)?);
        self.save_list(room_id, &list).await
    }

    /// Removes every entry with `who.id`.
    pub async fn remove_participant(&self, room_id: &str, who: &str) -> AppResult<()> {
        let mut list = self.raw_list(room_id).await?;
        let before = list.len();
        list.retain(|raw| parse_entry(raw).id != who);
        if list.len() != before {
            info!(room = room_id, participant = who, "participant removed");
            self.save_list(room_id, &list).await?;
        }
        Ok(())
    }

    /// Creator only: removes everyone.
    pub async fn close_room(&self, room_id: &str) -> AppResult<()> {
        if !self.is_creator(room_id).await? {
            return Err(bad("only the room creator can close the room"));
        }
        self.save_list(room_id, &[]).await?;
        info!(room = room_id, "room closed");
        Ok(())
    }

    pub async fn is_creator(&self, room_id: &str) -> AppResult<bool> {
        Ok(self.fetch(room_id).await?.is_some_and(|r| r.creator_id == self.client_id))
    }

    /// False once this device was removed from the room.
    pub async fn is_member(&self, room_id: &str) -> AppResult<bool> {
        Ok(self.participants(room_id).await?.iter().any(|p| p.id == self.client_id))
    }

    /// Re-checks membership every `every`; the receiver fires once this
    /// device is no longer in the list. Failed reads are not a removal.
    pub fn watch_membership(
        self: &Arc<Self>,
        room_id: &str,
        sched: &dyn Scheduler,
        every: Duration,
    ) -> (TaskHandle, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let dir = Arc::downgrade(self);
        let room = room_id.to_string();

        let handle = sched.schedule(
            every,
            task(move || {
                let (dir, room, tx) = (dir.clone(), room.clone(), tx.clone());
                async move {
                    let Some(dir) = dir.upgrade() else { return };
                    if tx.lock().await.is_none() {
                        return;
                    }
                    match dir.is_member(&room).await {
                        Ok(true) => {}
                        Ok(false) => {
                            info!(room, client = %dir.client_id, "no longer in the room");
                            if let Some(tx) = tx.lock().await.take() {
                                tx.send(()).ok();
                            }
                        }
                        Err(e) => warn!(room, error = %e, "membership check failed"),
                    }
                }
            }),
        );
        (handle, rx)
    }

    fn ticket(&self, record: &RoomRecord) -> RoomTicket {
        RoomTicket {
            room_id: record.room_id.clone(),
            room_code: record.room_code.clone(),
            join_url: self.join_url(&record.room_id, &record.room_code),
            creator_id: record.creator_id.clone(),
            client_id: self.client_id.clone(),
            is_creator: record.creator_id == self.client_id,
        }
    }

    async fn raw_list(&self, room_id: &str) -> AppResult<Vec<String>> {
        let list: Option<Vec<String>> = self.store.get_json(&keys::participants(room_id)).await?;
        Ok(list.unwrap_or_default())
    }

    async fn save_list(&self, room_id: &str, list: &[String]) -> AppResult<()> {
        self.store.put_json(&keys::participants(room_id), &list, keys::ROOM_TTL).await?;
        Ok(())
    }
}
