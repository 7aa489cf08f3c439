//! Live-update event bus for connected dashboards.

pub mod bus;
pub mod model;

pub use bus::{EventBus, HEARTBEAT_INTERVAL, Listener, ListenerId, spawn_heartbeat};
pub use model::{Event, EventType};
