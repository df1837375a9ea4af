// SPDX-License-Identifier: GPL-3.0-or-later
//! Wires together one node process's services: settings store, arbiter,
//! command listener, heartbeat emitter. The binary entry point
//! (`src/bin/node.rs`) constructs a [`NodeConfig`] from CLI/config/env
//! layers and hands it here.

use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::node::arbiter::{Arbiter, FrameSink};
use crate::node::command_listener::CommandListener;
use crate::node::heartbeat;
use crate::sensor::Sensor;
use crate::settings::SettingsStore;
use crate::wire::PortProfile;

/// Everything a node process needs to know about itself and where the
/// controller lives.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub logical_name: String,
    pub bind_ip: std::net::IpAddr,
    pub ports: PortProfile,
    pub controller_ip: std::net::IpAddr,
    pub settings_path: PathBuf,
}

impl NodeConfig {
    fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.ports.control)
    }

    fn video_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.ports.video)
    }

    fn heartbeat_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, 0)
    }

    fn controller_video_addr(&self) -> SocketAddr {
        SocketAddr::new(self.controller_ip, PortProfile::CONTROLLER_VIDEO)
    }

    fn controller_still_addr(&self) -> SocketAddr {
        SocketAddr::new(self.controller_ip, PortProfile::CONTROLLER_STILL)
    }

    fn controller_heartbeat_addr(&self) -> SocketAddr {
        SocketAddr::new(self.controller_ip, PortProfile::CONTROLLER_HEARTBEAT)
    }
}

/// A [`FrameSink`] that sends encoded preview JPEGs as UDP datagrams to
/// the controller's video ingress port.
struct UdpFrameSink {
    socket: StdUdpSocket,
    destination: SocketAddr,
}

impl FrameSink for UdpFrameSink {
    fn send_frame(&self, frame: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(frame, self.destination)?;
        Ok(())
    }
}

/// Run a node process to completion (it never returns in normal
/// operation; it returns only if a fatal bind error occurs).
#[instrument(skip_all, fields(node = %config.logical_name))]
pub async fn run<S: Sensor + 'static>(config: NodeConfig, sensor: S) -> anyhow::Result<()> {
    let settings = SettingsStore::load(&config.settings_path).await?;
    let arbiter = Arbiter::new(sensor, settings.clone());

    let frame_socket = StdUdpSocket::bind(config.heartbeat_bind_addr())?;
    frame_socket.set_nonblocking(true)?;
    let preview_sink: Arc<dyn FrameSink> = Arc::new(UdpFrameSink {
        socket: frame_socket,
        destination: config.controller_video_addr(),
    });

    let listener = CommandListener::bind(
        config.control_addr(),
        Arc::clone(&arbiter),
        settings,
        config.controller_still_addr(),
        preview_sink,
    )
    .await?;

    let heartbeat_bind = config.heartbeat_bind_addr();
    let heartbeat_controller = config.controller_heartbeat_addr();
    let heartbeat_task = tokio::spawn(async move {
        if let Err(e) = heartbeat::run(heartbeat_bind, heartbeat_controller).await {
            tracing::error!(error = %e, "heartbeat emitter exited");
        }
    });

    info!(control = %config.control_addr(), video = %config.video_addr(), "node started");
    tokio::select! {
        _ = listener.run() => {}
        _ = heartbeat_task => {}
    }
    Ok(())
}
