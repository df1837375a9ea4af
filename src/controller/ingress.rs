// SPDX-License-Identifier: GPL-3.0-or-later
//! The controller's video ingress and per-source display scheduler:
//! decouple network arrival rate from UI redraw rate, dropping frames
//! rather than queueing them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::imageops::FilterType;
use image::GenericImageView;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::controller::config::NodeRegistry;
use crate::controller::display::Display;

/// Display mode for a source, driving both the ingress rate limit and
/// the render timer cadence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayMode {
    /// Part of the tile grid: 4 Hz, 320x240.
    Grid,
    /// Enlarged single-source view: 15 Hz, 960x720.
    Exclusive,
}

impl DisplayMode {
    fn accept_interval(self) -> Duration {
        match self {
            DisplayMode::Grid => Duration::from_millis(250),
            DisplayMode::Exclusive => Duration::from_millis(67),
        }
    }

    fn target_size(self) -> (u32, u32) {
        match self {
            DisplayMode::Grid => (320, 240),
            DisplayMode::Exclusive => (960, 720),
        }
    }

    fn tick_interval(self) -> Duration {
        self.accept_interval()
    }
}

/// A decoded, resized frame ready to blit into a render target.
#[derive(Clone)]
pub struct DisplayFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

struct SourceState {
    mode: DisplayMode,
    last_accepted: Option<Instant>,
    buffered: Option<DisplayFrame>,
    dropped: u64,
    timer: Option<JoinHandle<()>>,
}

impl SourceState {
    fn new(mode: DisplayMode) -> Self {
        Self {
            mode,
            last_accepted: None,
            buffered: None,
            dropped: 0,
            timer: None,
        }
    }
}

/// Shared state between the ingress task and each source's render timer.
struct Shared<D: Display + 'static> {
    sources: Mutex<HashMap<String, SourceState>>,
    registry: NodeRegistry,
    display: Arc<D>,
}

/// The video ingress + scheduler. One UDP socket, one set of per-source
/// render timers.
pub struct VideoIngress<D: Display + 'static> {
    socket: Arc<UdpSocket>,
    shared: Arc<Shared<D>>,
}

impl<D: Display + 'static> VideoIngress<D> {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn bind(addr: SocketAddr, registry: NodeRegistry, display: Arc<D>) -> std::io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let mut sources = HashMap::new();
        for node in registry.iter() {
            sources.insert(node.logical_name.clone(), SourceState::new(DisplayMode::Grid));
        }
        Ok(Self {
            socket,
            shared: Arc::new(Shared {
                sources: Mutex::new(sources),
                registry,
                display,
            }),
        })
    }

    /// Serve forever: receive datagrams, rate-limit, decode+resize off
    /// the caller's synchronous path (inside `spawn_blocking`), buffer.
    pub async fn run(self) {
        let mut buf = vec![0u8; 65536];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "video ingress recv error");
                    continue;
                }
            };
            let Some(node) = self.shared.registry.resolve(from.ip()) else {
                debug!(%from, "dropping datagram from unknown sender");
                continue;
            };
            let logical_name = node.logical_name.clone();
            let datagram = buf[..len].to_vec();
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                handle_datagram(shared, logical_name, datagram).await;
            });
        }
    }

    /// Switch a source's display mode: stops the source's render timer,
    /// then resumes it with the new cadence. The render target
    /// reallocation itself happens naturally on the next tick, since a
    /// mode change changes `target_size`.
    pub async fn set_mode(&self, logical_name: &str, mode: DisplayMode) {
        let mut sources = self.shared.sources.lock().unwrap();
        if let Some(state) = sources.get_mut(logical_name) {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.mode = mode;
            state.last_accepted = None;
            state.buffered = None;
        }
        drop(sources);
        ensure_timer(Arc::clone(&self.shared), logical_name.to_string());
    }
}

#[instrument(skip(shared, datagram))]
async fn handle_datagram<D: Display + 'static>(shared: Arc<Shared<D>>, logical_name: String, datagram: Vec<u8>) {
    let now = Instant::now();
    let mode = {
        let mut sources = shared.sources.lock().unwrap();
        let Some(state) = sources.get_mut(&logical_name) else {
            return;
        };
        let interval = state.mode.accept_interval();
        if let Some(last) = state.last_accepted {
            if now.duration_since(last) < interval {
                state.dropped += 1;
                return;
            }
        }
        state.last_accepted = Some(now);
        state.mode
    };

    let decoded = match tokio::task::spawn_blocking(move || decode_and_resize(&datagram, mode)).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(e)) => {
            debug!(logical_name, error = %e, "dropping undecodable frame");
            return;
        }
        Err(e) => {
            warn!(logical_name, error = %e, "decode task panicked");
            return;
        }
    };

    {
        let mut sources = shared.sources.lock().unwrap();
        if let Some(state) = sources.get_mut(&logical_name) {
            state.buffered = Some(decoded);
            let needs_timer = state.timer.is_none();
            drop(sources);
            if needs_timer {
                ensure_timer(Arc::clone(&shared), logical_name.clone());
            }
        }
    }
}

fn decode_and_resize(bytes: &[u8], mode: DisplayMode) -> anyhow::Result<DisplayFrame> {
    let image = image::load_from_memory(bytes)?;
    let (target_w, target_h) = mode.target_size();
    let resized = if image.dimensions() == (target_w, target_h) {
        image
    } else {
        image.resize_exact(target_w, target_h, FilterType::Triangle)
    };
    let rgb = resized.to_rgb8();
    Ok(DisplayFrame {
        width: rgb.width(),
        height: rgb.height(),
        rgb: rgb.into_raw(),
    })
}

/// Start a render timer for `logical_name` if one isn't already running.
/// At most one render timer ever runs per source.
fn ensure_timer<D: Display + 'static>(shared: Arc<Shared<D>>, logical_name: String) {
    let mut sources = shared.sources.lock().unwrap();
    let Some(state) = sources.get_mut(&logical_name) else {
        return;
    };
    if state.timer.is_some() {
        return;
    }
    let interval = state.mode.tick_interval();
    let shared_for_timer = Arc::clone(&shared);
    let name_for_timer = logical_name.clone();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let frame = {
                let mut sources = shared_for_timer.sources.lock().unwrap();
                let Some(state) = sources.get_mut(&name_for_timer) else {
                    return;
                };
                state.buffered.take()
            };
            if let Some(frame) = frame {
                shared_for_timer.display.render_tile(&name_for_timer, &frame);
            }
        }
    });
    state.timer = Some(handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::display::RecordingDisplay;
    use crate::wire::PortProfile;

    fn registry() -> NodeRegistry {
        NodeRegistry::new([crate::controller::config::NodeEntry {
            logical_name: "rep1".to_string(),
            address: "127.0.0.1".parse().unwrap(),
            ports: PortProfile::REMOTE,
        }])
    }

    #[test]
    fn decode_and_resize_produces_target_dimensions() {
        let frame = image::RgbImage::from_pixel(100, 100, image::Rgb([1, 2, 3]));
        let mut bytes = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut bytes)
            .encode(frame.as_raw(), 100, 100, image::ExtendedColorType::Rgb8)
            .unwrap();
        let decoded = decode_and_resize(&bytes, DisplayMode::Grid).unwrap();
        assert_eq!((decoded.width, decoded.height), (320, 240));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode_and_resize(b"not a jpeg", DisplayMode::Grid).is_err());
    }

    #[tokio::test]
    async fn a_burst_of_frames_within_one_interval_collapses_to_one_render() {
        let display = Arc::new(RecordingDisplay::default());
        let ingress = VideoIngress::bind("127.0.0.1:0".parse().unwrap(), registry(), Arc::clone(&display))
            .await
            .unwrap();

        let mut frame = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut frame)
            .encode(
                image::RgbImage::from_pixel(320, 240, image::Rgb([1, 1, 1])).as_raw(),
                320,
                240,
                image::ExtendedColorType::Rgb8,
            )
            .unwrap();

        for _ in 0..5 {
            handle_datagram(Arc::clone(&ingress.shared), "rep1".to_string(), frame.clone()).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(display.render_count("rep1"), 1);
    }

    #[tokio::test]
    async fn only_one_timer_runs_per_source_across_a_mode_change() {
        let display = Arc::new(RecordingDisplay::default());
        let ingress = VideoIngress::bind("127.0.0.1:0".parse().unwrap(), registry(), Arc::clone(&display))
            .await
            .unwrap();

        let mut frame = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut frame)
            .encode(
                image::RgbImage::from_pixel(320, 240, image::Rgb([1, 1, 1])).as_raw(),
                320,
                240,
                image::ExtendedColorType::Rgb8,
            )
            .unwrap();

        handle_datagram(Arc::clone(&ingress.shared), "rep1".to_string(), frame.clone()).await;
        ingress.set_mode("rep1", DisplayMode::Exclusive).await;

        {
            let sources = ingress.shared.sources.lock().unwrap();
            let state = sources.get("rep1").unwrap();
            assert_eq!(state.mode, DisplayMode::Exclusive);
            assert!(state.buffered.is_none(), "mode change clears any stale buffered frame");
        }

        handle_datagram(Arc::clone(&ingress.shared), "rep1".to_string(), frame.clone()).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let timer_count = {
            let sources = ingress.shared.sources.lock().unwrap();
            sources.get("rep1").unwrap().timer.is_some() as usize
        };
        assert_eq!(timer_count, 1, "exactly one render timer survives the mode change");
        assert_eq!(display.render_count("rep1"), 1);
    }
}
