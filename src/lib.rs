//! Shared library for the `repcam` node and controller processes.
//!
//! A node owns one camera sensor and serves a preview stream, a still-capture
//! protocol and a liveness beacon (see [`node`]). The controller multiplexes
//! previews from the whole fleet, triggers synchronized stills and tracks
//! liveness (see [`controller`]). Both processes share the wire protocol
//! ([`wire`]), the device settings model ([`settings`]) and the frame
//! transform pipeline ([`transform`]).

pub mod controller;
pub mod error;
pub mod node;
pub mod sensor;
pub mod settings;
pub mod transform;
pub mod wire;

pub use error::{ControllerError, NodeError};
