// SPDX-License-Identifier: GPL-3.0-or-later
//! The interface between the in-scope ingest/scheduler machinery and the
//! out-of-scope on-screen widget toolkit. [`Display`] is that seam: a
//! thin, UI-thread-only trait the scheduler and still ingress drive,
//! with a logging implementation standing in for a real toolkit and a
//! recording implementation used to assert scheduler/ingress invariants
//! in tests.

use std::sync::{Arc, Mutex};

use tracing::info;

/// Liveness state shown on a node's preview tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
}

/// Everything the display scheduler, still ingress, and heartbeat monitor
/// need from the UI shell. Every method is assumed to run on (or be
/// marshaled onto) the UI thread; implementations must be `O(1)`.
pub trait Display: Send + Sync {
    /// Blit `frame` (already decoded and resized) into the tile for
    /// `logical_name`.
    fn render_tile(&self, logical_name: &str, frame: &crate::controller::ingress::DisplayFrame);

    /// Update a tile's liveness indicator.
    fn set_liveness(&self, logical_name: &str, liveness: Liveness);

    /// Enqueue a gallery thumbnail for a newly written still image.
    fn gallery_update(&self, logical_name: &str, path: &std::path::Path);

    /// Record a heartbeat-ticker stall: any delay beyond 300ms.
    fn ui_stall(&self, delay_ms: u128);
}

/// Production [`Display`]: logs every event via `tracing`, standing in
/// for the real widget toolkit until one is wired in.
pub struct LoggingDisplay;

impl Display for LoggingDisplay {
    fn render_tile(&self, logical_name: &str, frame: &crate::controller::ingress::DisplayFrame) {
        info!(logical_name, width = frame.width, height = frame.height, "tile rendered");
    }

    fn set_liveness(&self, logical_name: &str, liveness: Liveness) {
        info!(logical_name, ?liveness, "liveness changed");
    }

    fn gallery_update(&self, logical_name: &str, path: &std::path::Path) {
        info!(logical_name, path = %path.display(), "gallery updated");
    }

    fn ui_stall(&self, delay_ms: u128) {
        if delay_ms > 300 {
            tracing::warn!(delay_ms, "heartbeat ticker stalled");
        }
    }
}

#[derive(Default)]
struct RecordingState {
    renders: Vec<(String, u32, u32)>,
    liveness: Vec<(String, Liveness)>,
    gallery: Vec<(String, std::path::PathBuf)>,
    stalls: Vec<u128>,
}

/// In-memory [`Display`] used by tests to assert the scheduler/ingress
/// invariants without a real widget toolkit.
#[derive(Clone, Default)]
pub struct RecordingDisplay {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingDisplay {
    pub fn render_count(&self, logical_name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .renders
            .iter()
            .filter(|(name, _, _)| name == logical_name)
            .count()
    }

    pub fn last_liveness(&self, logical_name: &str) -> Option<Liveness> {
        self.state
            .lock()
            .unwrap()
            .liveness
            .iter()
            .rev()
            .find(|(name, _)| name == logical_name)
            .map(|(_, l)| *l)
    }

    pub fn gallery_count(&self) -> usize {
        self.state.lock().unwrap().gallery.len()
    }

    pub fn stall_count(&self) -> usize {
        self.state.lock().unwrap().stalls.len()
    }
}

impl Display for RecordingDisplay {
    fn render_tile(&self, logical_name: &str, frame: &crate::controller::ingress::DisplayFrame) {
        self.state
            .lock()
            .unwrap()
            .renders
            .push((logical_name.to_string(), frame.width, frame.height));
    }

    fn set_liveness(&self, logical_name: &str, liveness: Liveness) {
        self.state.lock().unwrap().liveness.push((logical_name.to_string(), liveness));
    }

    fn gallery_update(&self, logical_name: &str, path: &std::path::Path) {
        self.state.lock().unwrap().gallery.push((logical_name.to_string(), path.to_path_buf()));
    }

    fn ui_stall(&self, delay_ms: u128) {
        if delay_ms > 300 {
            self.state.lock().unwrap().stalls.push(delay_ms);
        }
    }
}
