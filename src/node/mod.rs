//! The node-side half of the system: per-device settings, camera
//! arbiter, preview loop, still handler, command listener, heartbeat
//! emitter.

pub mod app;
pub mod arbiter;
pub mod command_listener;
pub mod heartbeat;
pub mod preview;
pub mod still;
