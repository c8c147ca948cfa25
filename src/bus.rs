//! Same-device control bus between the main window (the broadcaster) and a
//! detached companion control surface.
//!
//! The companion keeps no state: it renders the last `STATE_UPDATE` and sends
//! `CMD_*` messages, which the main window executes and answers with a fresh
//! `STATE_UPDATE`. A bus built with [`ControlBus::unavailable`] swallows
//! everything, so the companion degrades to a no-op.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::warn;

const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusMessage {
    StateUpdate { streaming: bool, paused: bool, elapsed: u64 },
    CmdPause,
    CmdResume,
    CmdStop,
    CmdRequestState,
}

impl BusMessage {
    pub fn is_command(&self) -> bool {
        !matches!(self, BusMessage::StateUpdate { .. })
    }
}

/// One per process: created at start-up, dropped at exit.
#[derive(Debug, Clone)]
pub struct ControlBus {
    tx: Option<broadcast::Sender<BusMessage>>,
}

impl ControlBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx: Some(tx) }
    }

    pub fn unavailable() -> Self {
        Self { tx: None }
    }

    pub fn is_available(&self) -> bool {
        self.tx.is_some()
    }

    pub fn publish(&self, msg: BusMessage) {
        if let Some(tx) = &self.tx {
            tx.send(msg).ok(); // 沒人訂閱時 send 會失敗，忽略
        }
    }

    /// Raw receiver, `None` when the bus is unavailable.
    pub fn receiver(&self) -> Option<broadcast::Receiver<BusMessage>> {
        self.tx.as_ref().map(|tx| tx.subscribe())
    }

    /// Feeds every message to `handler`, one at a time, until the returned
    /// subscription is dropped or unsubscribed.
    pub fn subscribe<F, Fut>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(BusMessage) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(mut rx) = self.receiver() else {
            return Subscription { task: None };
        };
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => handler(msg).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "control bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { task: Some(task) }
    }
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(&mut self) {
        if let Some(t) = self.task.take() {
            t.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
