use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Device-wide "audio enabled" switch, read by both listener loops.
#[derive(Debug, Clone)]
pub struct AudioGate(Arc<AtomicBool>);

impl AudioGate {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }
}

impl Default for AudioGate {
    fn default() -> Self {
        Self::new(true)
    }
}
