//! Interval scheduling behind a trait so poll and timer loops can be driven
//! by hand in tests.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use futures_util::future::BoxFuture;
use tokio::time::{self, MissedTickBehavior};

pub type Task = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub fn task<F, Fut>(f: F) -> Task
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

pub trait Scheduler: Send + Sync {
    /// Runs `task` every `every`, first run one interval from now, until the
    /// handle is cancelled.
    fn schedule(&self, every: Duration, task: Task) -> TaskHandle;
}

/// Cancels its schedule on `cancel()` or drop. Cancelling twice is a no-op.
pub struct TaskHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TaskHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self { cancel: Some(Box::new(cancel)) }
    }

    pub fn cancel(&mut self) {
        if let Some(f) = self.cancel.take() {
            f();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_none()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/* ------------ tokio 計時器 ------------ */
// 每個 tick 各自 spawn，跟瀏覽器的 setInterval 一樣可能重疊；
// 重疊由各 loop 自己的 in-flight guard 擋掉。
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, every: Duration, task: Task) -> TaskHandle {
        let ticker = tokio::spawn(async move {
            let mut tick = time::interval_at(time::Instant::now() + every, every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                tokio::spawn(task());
            }
        });
        TaskHandle::new(move || ticker.abort())
    }
}

/* ------------ 測試用：手動觸發 ------------ */
struct Slot {
    every: Duration,
    task: Task,
    live: Arc<AtomicBool>,
}

#[derive(Clone, Default)]
pub struct ManualScheduler {
    slots: Arc<Mutex<Vec<Slot>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules not yet cancelled.
    pub fn active(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|s| s.live.load(Ordering::SeqCst));
        slots.len()
    }

    pub fn intervals(&self) -> Vec<Duration> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.iter().filter(|s| s.live.load(Ordering::SeqCst)).map(|s| s.every).collect()
    }

    /// Runs one tick of every live schedule, in registration order.
    pub async fn fire(&self) -> usize {
        let due: Vec<Task> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.iter().filter(|s| s.live.load(Ordering::SeqCst)).map(|s| s.task.clone()).collect()
        };
        for t in &due {
            t().await;
        }
        due.len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, every: Duration, task: Task) -> TaskHandle {
        let live = Arc::new(AtomicBool::new(true));
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Slot { every, task, live: live.clone() });
        TaskHandle::new(move || live.store(false, Ordering::SeqCst))
    }
}

/* ------------ 單飛：上一個 tick 還沒回來就跳過 ------------ */
/// At most one holder at a time. `reset` forgets the current holder, whose
/// guard then releases nothing when it drops.
#[derive(Debug, Default)]
pub struct SingleFlight {
    holder: AtomicU64,
    tokens: AtomicU64,
}

pub struct FlightGuard<'a> {
    flight: &'a SingleFlight,
    token: u64,
}

impl SingleFlight {
    pub fn try_enter(&self) -> Option<FlightGuard<'_>> {
        let token = self.tokens.fetch_add(1, Ordering::Relaxed) + 1;
        self.holder
            .compare_exchange(0, token, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard { flight: self, token })
    }

    pub fn reset(&self) {
        self.holder.store(0, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.holder.load(Ordering::Acquire) != 0
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // 只清自己的 token；reset 之後新進來的不受影響
        self.flight
            .holder
            .compare_exchange(self.token, 0, Ordering::AcqRel, Ordering::Acquire)
            .ok();
    }
}
