// SPDX-License-Identifier: GPL-3.0-or-later
//! The controller's still ingress: a TCP listener writing received
//! JPEGs under a dated per-device directory layout, falling back to a
//! temporary root if the base directory is unwritable.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::controller::config::NodeRegistry;
use crate::controller::display::Display;
use crate::error::ControllerError;

/// Bound on a single still upload, generous enough for any real JPEG.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
/// Gallery UI updates are batched to avoid saturating the UI thread:
/// at most one batch every [`GALLERY_BATCH_INTERVAL`], capped at
/// [`GALLERY_BATCH_MAX_ITEMS`] per batch.
const GALLERY_BATCH_INTERVAL: Duration = Duration::from_millis(250);
const GALLERY_BATCH_MAX_ITEMS: usize = 3;

pub struct StillIngress<D: Display + 'static> {
    listener: TcpListener,
    registry: NodeRegistry,
    base_dir: PathBuf,
    fallback_dir: PathBuf,
    display: Arc<D>,
    batch: Arc<Mutex<Vec<(String, PathBuf)>>>,
}

impl<D: Display + 'static> StillIngress<D> {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn bind(
        addr: SocketAddr,
        registry: NodeRegistry,
        base_dir: PathBuf,
        fallback_dir: PathBuf,
        display: Arc<D>,
    ) -> Result<Self, ControllerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ControllerError::Bind { addr, source })?;
        let ingress = Self {
            listener,
            registry,
            base_dir,
            fallback_dir,
            display,
            batch: Arc::new(Mutex::new(Vec::new())),
        };
        ingress.spawn_batch_flusher();
        Ok(ingress)
    }

    fn spawn_batch_flusher(&self) {
        let batch = Arc::clone(&self.batch);
        let display = Arc::clone(&self.display);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GALLERY_BATCH_INTERVAL);
            loop {
                ticker.tick().await;
                let mut items = batch.lock().await;
                let take = items.len().min(GALLERY_BATCH_MAX_ITEMS);
                for (logical_name, path) in items.drain(..take) {
                    display.gallery_update(&logical_name, &path);
                }
            }
        });
    }

    pub async fn run(self: Arc<Self>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, from)) => {
                    let ingress = Arc::clone(&self);
                    tokio::spawn(async move { ingress.handle_connection(stream, from).await });
                }
                Err(e) => warn!(error = %e, "still ingress accept error"),
            }
        }
    }

    #[instrument(skip(self, stream), fields(%from))]
    async fn handle_connection(&self, mut stream: TcpStream, from: SocketAddr) {
        let Some(node) = self.registry.resolve(from.ip()) else {
            warn!(%from, "still upload from unrecognized sender, dropping");
            return;
        };
        let logical_name = node.logical_name.clone();

        let mut buffer = Vec::new();
        let mut limited = stream.take(MAX_UPLOAD_BYTES as u64 + 1);
        if let Err(e) = limited.read_to_end(&mut buffer).await {
            warn!(logical_name, error = %e, "failed reading still upload");
            return;
        }
        if buffer.len() > MAX_UPLOAD_BYTES {
            warn!(logical_name, "still upload exceeded size bound, discarding");
            return;
        }

        let relative = self.relative_path(&logical_name);
        let primary = self.base_dir.join(&relative);
        let path = match write_still(&primary, &buffer).await {
            Ok(()) => primary,
            Err(e) => {
                warn!(logical_name, error = %e, "base directory unwritable, falling back to temp root");
                let fallback = self.fallback_dir.join(&relative);
                match write_still(&fallback, &buffer).await {
                    Ok(()) => fallback,
                    Err(e) => {
                        warn!(logical_name, error = %e, "still write failed even after fallback");
                        return;
                    }
                }
            }
        };
        info!(logical_name, path = %path.display(), bytes = buffer.len(), "still image written");
        self.batch.lock().await.push((logical_name, path));
    }

    fn relative_path(&self, logical_name: &str) -> PathBuf {
        let now = Local::now();
        let date_dir = now.format("%Y-%m-%d").to_string();
        let file_name = format!("{}.jpg", now.format("%Y%m%d_%H%M%S"));
        PathBuf::from(date_dir).join(logical_name).join(file_name)
    }
}

async fn write_still(path: &Path, buffer: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, buffer).await
}
