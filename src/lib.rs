//! Listen-together audio relay over a shared expiring key-value store.
//!
//! A room creator either broadcasts live capture as short numbered chunks
//! ([`live`]) or shares a file whose play/pause/seek events listeners follow
//! ([`ondemand`]). Listeners only ever poll; there is no server of our own.

pub mod bus;
pub mod config;
pub mod error;
pub mod gate;
pub mod keys;
pub mod live;
pub mod ondemand;
pub mod output;
pub mod room;
pub mod routes;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod utils {
    pub mod clock;
    pub mod sched;
}
