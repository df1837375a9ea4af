//! Domain error kinds for the node and controller processes.
//!
//! These map one-to-one onto the error-kind tables in the design: every
//! variant here is either recovered locally (logged and the loop continues)
//! or, for [`NodeError::SensorFault`]-style faults, causes a state
//! transition back to idle. Only [`ControllerError::Bind`] is fatal.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised on the node side.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The sensor driver returned an error, or a capture timed out.
    ///
    /// The arbiter transitions to `Idle` on this error; subsequent commands
    /// may retry.
    #[error("sensor fault: {0}")]
    SensorFault(String),

    /// A UDP send failed. Counted and non-fatal until a consecutive-error
    /// threshold is crossed.
    #[error("transient network error: {0}")]
    TransientNetwork(#[source] std::io::Error),

    /// The TCP still upload exhausted its retries.
    #[error("still upload failed after retries: {0}")]
    UploadFailed(#[source] std::io::Error),

    /// The settings file could not be written. The in-memory change is
    /// kept; a future save is retried.
    #[error("settings I/O error for {path}: {source}")]
    SettingsIoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A command datagram was unparseable or out of range.
    #[error("bad command: {0}")]
    BadCommand(String),

    /// `capture_still` was requested while a capture was already in flight.
    #[error("arbiter busy: a still capture is already in progress")]
    Busy,
}

/// Errors raised on the controller side.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A UDP video datagram contained a corrupt JPEG. The frame is dropped;
    /// the source is not otherwise penalized.
    #[error("failed to decode frame from {addr}: {source}")]
    Decode {
        addr: std::net::SocketAddr,
        #[source]
        source: image::ImageError,
    },

    /// A listening port was already in use at startup. Fatal.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A still image's destination directory could not be created or
    /// written to.
    #[error("still I/O error writing {path}: {source}")]
    StillIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A render-timer tick fired later than expected.
    #[error("UI stall: tick for {source_name} delayed by {delay_ms}ms")]
    UiStall { source_name: String, delay_ms: u128 },
}