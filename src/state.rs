use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{bus::ControlBus, live::{CaptureProvider, LiveBroadcaster}, ondemand::OnDemandWriter};

/* ------------ host 端共用狀態（axum Extension） ------------ */
#[derive(Clone)]
pub struct HostState {
    pub room: String,
    pub live: LiveBroadcaster,
    pub capture: Arc<dyn CaptureProvider>,
    pub writer: Arc<Mutex<OnDemandWriter>>,
    pub bus: ControlBus,
}
