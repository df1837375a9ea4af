// SPDX-License-Identifier: GPL-3.0-or-later
//! Wires together the controller process: node registry, video ingress
//! + display scheduler, still ingress, heartbeat monitor, command
//! emitter.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::controller::command_emitter::CommandEmitter;
use crate::controller::config::NodeRegistry;
use crate::controller::display::Display;
use crate::controller::heartbeat::HeartbeatMonitor;
use crate::controller::ingress::VideoIngress;
use crate::controller::still_ingress::StillIngress;
use crate::wire::PortProfile;

/// Controller-wide runtime configuration, analogous to [`crate::node::app::NodeConfig`].
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub bind_ip: IpAddr,
    pub image_base_dir: PathBuf,
    pub image_fallback_dir: PathBuf,
    pub local_node_name: String,
}

/// Run a controller process to completion. Returns only on a fatal bind
/// error.
#[instrument(skip_all)]
pub async fn run<D: Display + 'static>(
    config: ControllerConfig,
    registry: NodeRegistry,
    display: Arc<D>,
) -> anyhow::Result<()> {
    let video_addr = SocketAddr::new(config.bind_ip, PortProfile::CONTROLLER_VIDEO);
    let still_addr = SocketAddr::new(config.bind_ip, PortProfile::CONTROLLER_STILL);
    let heartbeat_addr = SocketAddr::new(config.bind_ip, PortProfile::CONTROLLER_HEARTBEAT);

    let ingress = VideoIngress::bind(video_addr, registry.clone(), Arc::clone(&display)).await?;
    let still_ingress = Arc::new(
        StillIngress::bind(
            still_addr,
            registry.clone(),
            config.image_base_dir.clone(),
            config.image_fallback_dir.clone(),
            Arc::clone(&display),
        )
        .await?,
    );
    let heartbeat_monitor = HeartbeatMonitor::bind(heartbeat_addr, registry.clone(), Arc::clone(&display)).await?;

    let local_node_name = config.local_node_name.clone();
    let _emitter = CommandEmitter::new(registry.clone(), move |name| name == local_node_name).await?;

    info!(%video_addr, %still_addr, %heartbeat_addr, nodes = registry.len(), "controller started");

    tokio::join!(ingress.run(), still_ingress.run(), heartbeat_monitor.run(),);
    Ok(())
}
