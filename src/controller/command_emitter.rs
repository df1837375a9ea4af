// SPDX-License-Identifier: GPL-3.0-or-later
//! The controller's command emitter: a non-blocking sender so the UI
//! thread never waits on network I/O, routing each command class to the
//! right port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{instrument, warn};

use crate::controller::config::NodeRegistry;

/// Delay between repeated shutdown/reboot sends, sent multiple times
/// with small delays for idempotence against a dropped datagram.
const SHUTDOWN_RETRANSMIT_DELAY: Duration = Duration::from_millis(300);
const SHUTDOWN_RETRANSMIT_COUNT: u32 = 3;

/// The class of command being sent, which determines the destination
/// port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandClass {
    StreamControl,
    ShutdownOrReboot,
    Other,
}

pub struct CommandEmitter {
    socket: Arc<UdpSocket>,
    registry: NodeRegistry,
    /// Whether this is the local node's listener, which binds only
    /// `control` and so falls back to it for every command class.
    is_local: Box<dyn Fn(&str) -> bool + Send + Sync>,
}

impl CommandEmitter {
    pub async fn new(
        registry: NodeRegistry,
        is_local: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> std::io::Result<Self> {
        let is_local: Box<dyn Fn(&str) -> bool + Send + Sync> = Box::new(is_local);
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        Ok(Self { socket, registry, is_local })
    }

    /// Dispatch `payload` to `logical_name` on a background task so the
    /// caller never blocks on the send.
    #[instrument(skip(self, payload))]
    pub fn send(&self, logical_name: &str, class: CommandClass, payload: &'static [u8]) {
        let Some(node) = self.registry.get(logical_name) else {
            warn!(logical_name, "cannot send command to unknown node");
            return;
        };
        let port = self.port_for(logical_name, node.ports, class);
        let addr = SocketAddr::new(node.address, port);
        let socket = Arc::clone(&self.socket);
        let retransmits = if class == CommandClass::ShutdownOrReboot {
            SHUTDOWN_RETRANSMIT_COUNT
        } else {
            1
        };
        tokio::spawn(async move {
            for attempt in 0..retransmits {
                if let Err(e) = socket.send_to(payload, addr).await {
                    warn!(%addr, error = %e, "command send failed");
                }
                if attempt + 1 < retransmits {
                    tokio::time::sleep(SHUTDOWN_RETRANSMIT_DELAY).await;
                }
            }
        });
    }

    fn port_for(&self, logical_name: &str, ports: crate::wire::PortProfile, class: CommandClass) -> u16 {
        match class {
            CommandClass::StreamControl => {
                if (self.is_local)(logical_name) {
                    ports.control
                } else {
                    ports.video_control
                }
            }
            CommandClass::ShutdownOrReboot | CommandClass::Other => ports.control,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::config::NodeEntry;
    use crate::wire::PortProfile;

    fn registry() -> NodeRegistry {
        NodeRegistry::new([
            NodeEntry {
                logical_name: "rep1".to_string(),
                address: "10.0.0.1".parse().unwrap(),
                ports: PortProfile::REMOTE,
            },
            NodeEntry {
                logical_name: "rep8".to_string(),
                address: "127.0.0.1".parse().unwrap(),
                ports: PortProfile::LOCAL,
            },
        ])
    }

    fn is_local(name: &str) -> bool {
        name == "rep8"
    }

    #[tokio::test]
    async fn stream_control_uses_video_control_port_for_remote_nodes() {
        let emitter = CommandEmitter::new(registry(), is_local).await.unwrap();
        let port = emitter.port_for("rep1", PortProfile::REMOTE, CommandClass::StreamControl);
        assert_eq!(port, PortProfile::REMOTE.video_control);
    }

    #[tokio::test]
    async fn stream_control_falls_back_to_control_port_for_local_node() {
        let emitter = CommandEmitter::new(registry(), is_local).await.unwrap();
        let port = emitter.port_for("rep8", PortProfile::LOCAL, CommandClass::StreamControl);
        assert_eq!(port, PortProfile::LOCAL.control);
    }

    #[tokio::test]
    async fn shutdown_always_targets_the_control_port() {
        let emitter = CommandEmitter::new(registry(), is_local).await.unwrap();
        let port = emitter.port_for("rep1", PortProfile::REMOTE, CommandClass::ShutdownOrReboot);
        assert_eq!(port, PortProfile::REMOTE.control);
    }
}
