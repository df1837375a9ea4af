// SPDX-License-Identifier: GPL-3.0-or-later
//! The node's heartbeat emitter: a 1 Hz UDP beacon carrying the exact
//! bytes `HEARTBEAT`, used by the controller's liveness tracker.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{instrument, warn};

/// The literal payload every heartbeat datagram carries.
pub const HEARTBEAT_PAYLOAD: &[u8] = b"HEARTBEAT";
/// Beacon cadence.
const INTERVAL: Duration = Duration::from_secs(1);

/// Emit heartbeat datagrams to `controller` at [`INTERVAL`] forever.
/// Send failures are logged and otherwise ignored: a missed heartbeat
/// just means the controller's liveness window lapses for one tick.
#[instrument(skip_all, fields(%controller))]
pub async fn run(bind_addr: SocketAddr, controller: SocketAddr) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(bind_addr).await?;
    let mut ticker = tokio::time::interval(INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = socket.send_to(HEARTBEAT_PAYLOAD, controller).await {
            warn!(error = %e, "heartbeat send failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket as TestSocket;

    #[tokio::test]
    async fn a_single_beacon_carries_the_exact_payload() {
        let receiver = TestSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        let sender = TestSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(HEARTBEAT_PAYLOAD, receiver_addr).await.unwrap();

        let mut buf = [0u8; 32];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], HEARTBEAT_PAYLOAD);
    }
}
