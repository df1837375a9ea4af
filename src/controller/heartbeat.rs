// SPDX-License-Identifier: GPL-3.0-or-later
//! The controller's heartbeat monitor: a UDP listener recording the last
//! beacon time per sender, plus a periodic liveness sweep and a
//! self-test ticker that logs UI stalls.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::{instrument, warn};

use crate::controller::config::NodeRegistry;
use crate::controller::display::{Display, Liveness};
use crate::node::heartbeat::HEARTBEAT_PAYLOAD;

/// How often the liveness sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3);
/// A node with no heartbeat within this window is considered dead.
const LIVENESS_WINDOW: Duration = Duration::from_secs(10);
/// Self-test ticker cadence.
const SELF_TEST_INTERVAL: Duration = Duration::from_millis(200);

struct State {
    last_seen: HashMap<String, Instant>,
    alive: HashMap<String, bool>,
}

pub struct HeartbeatMonitor<D: Display + 'static> {
    socket: UdpSocket,
    registry: NodeRegistry,
    display: Arc<D>,
    state: Mutex<State>,
}

impl<D: Display + 'static> HeartbeatMonitor<D> {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn bind(addr: SocketAddr, registry: NodeRegistry, display: Arc<D>) -> std::io::Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Arc::new(Self {
            socket,
            registry,
            display,
            state: Mutex::new(State {
                last_seen: HashMap::new(),
                alive: HashMap::new(),
            }),
        }))
    }

    pub async fn run(self: Arc<Self>) {
        let receiver = Arc::clone(&self);
        let sweeper = Arc::clone(&self);
        let self_test = Arc::clone(&self);
        tokio::join!(
            receiver.receive_loop(),
            sweeper.sweep_loop(),
            self_test.self_test_loop(),
        );
    }

    async fn receive_loop(&self) {
        let mut buf = [0u8; 32];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, from)) => self.record_beacon(&buf[..len], from),
                Err(e) => warn!(error = %e, "heartbeat recv error"),
            }
        }
    }

    #[instrument(skip(self, payload), fields(%from))]
    fn record_beacon(&self, payload: &[u8], from: SocketAddr) {
        if payload != HEARTBEAT_PAYLOAD {
            return;
        }
        let Some(node) = self.registry.resolve(from.ip()) else {
            return;
        };
        self.state.lock().unwrap().last_seen.insert(node.logical_name.clone(), Instant::now());
    }

    async fn sweep_loop(&self) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let now = Instant::now();
            let mut state = self.state.lock().unwrap();
            for node in self.registry.iter() {
                let is_alive = state
                    .last_seen
                    .get(&node.logical_name)
                    .map(|last| now.duration_since(*last) < LIVENESS_WINDOW)
                    .unwrap_or(false);
                let previous = state.alive.get(&node.logical_name).copied();
                if previous != Some(is_alive) {
                    state.alive.insert(node.logical_name.clone(), is_alive);
                    self.display.set_liveness(
                        &node.logical_name,
                        if is_alive { Liveness::Alive } else { Liveness::Dead },
                    );
                }
            }
        }
    }

    async fn self_test_loop(&self) {
        let mut ticker = tokio::time::interval(SELF_TEST_INTERVAL);
        let mut last_tick = Instant::now();
        loop {
            ticker.tick().await;
            let now = Instant::now();
            let delay = now.duration_since(last_tick).saturating_sub(SELF_TEST_INTERVAL);
            self.display.ui_stall(delay.as_millis());
            last_tick = now;
        }
    }

    pub fn is_alive(&self, logical_name: &str) -> bool {
        self.state.lock().unwrap().alive.get(logical_name).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::config::NodeEntry;
    use crate::controller::display::RecordingDisplay;
    use crate::wire::PortProfile;

    fn registry() -> NodeRegistry {
        NodeRegistry::new([NodeEntry {
            logical_name: "rep1".to_string(),
            address: "127.0.0.1".parse().unwrap(),
            ports: PortProfile::REMOTE,
        }])
    }

    #[tokio::test]
    async fn a_node_with_no_beacons_is_marked_dead_on_first_sweep() {
        let display = Arc::new(RecordingDisplay::default());
        let monitor = HeartbeatMonitor::bind("127.0.0.1:0".parse().unwrap(), registry(), Arc::clone(&display))
            .await
            .unwrap();
        monitor.sweep_loop_once_for_test().await;
        assert_eq!(display.last_liveness("rep1"), Some(Liveness::Dead));
    }

    #[tokio::test]
    async fn a_recent_beacon_marks_the_node_alive() {
        let display = Arc::new(RecordingDisplay::default());
        let monitor = HeartbeatMonitor::bind("127.0.0.1:0".parse().unwrap(), registry(), Arc::clone(&display))
            .await
            .unwrap();
        monitor.record_beacon(HEARTBEAT_PAYLOAD, "127.0.0.1:9999".parse().unwrap());
        monitor.sweep_loop_once_for_test().await;
        assert_eq!(display.last_liveness("rep1"), Some(Liveness::Alive));
    }

    impl<D: Display + 'static> HeartbeatMonitor<D> {
        /// Run exactly one sweep iteration synchronously, for tests that
        /// don't want to wait a real 3s tick.
        async fn sweep_loop_once_for_test(&self) {
            let now = Instant::now();
            let mut state = self.state.lock().unwrap();
            for node in self.registry.iter() {
                let is_alive = state
                    .last_seen
                    .get(&node.logical_name)
                    .map(|last| now.duration_since(*last) < LIVENESS_WINDOW)
                    .unwrap_or(false);
                state.alive.insert(node.logical_name.clone(), is_alive);
                self.display.set_liveness(
                    &node.logical_name,
                    if is_alive { Liveness::Alive } else { Liveness::Dead },
                );
            }
        }
    }
}
