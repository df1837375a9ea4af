// SPDX-License-Identifier: GPL-3.0-or-later
//! The node's command listener: a UDP server dispatching parsed commands
//! to the arbiter and settings store, applying the restart-after-mutation
//! policy (sensor-control changes restart preview; pure transform changes
//! never do, so a flip command can never bounce the sensor and regress
//! brightness).

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::net::UdpSocket;
use tracing::{debug, info, instrument, warn};

use crate::node::arbiter::{Arbiter, FrameSink};
use crate::node::still;
use crate::sensor::Sensor;
use crate::settings::{DeviceSettings, Rotation, SettingsStore};
use crate::wire::{Command, CropField, FlipAxis};

/// Maximum UDP datagram this listener will accept; generously larger than
/// any real command, just a sanity backstop.
const MAX_DATAGRAM: usize = 4096;

pub struct CommandListener<S: Sensor + 'static> {
    socket: UdpSocket,
    arbiter: Arc<Arbiter<S>>,
    settings: SettingsStore,
    controller_still_addr: SocketAddr,
    preview_sink: Arc<dyn FrameSink>,
}

impl<S: Sensor + 'static> CommandListener<S> {
    pub async fn bind(
        addr: SocketAddr,
        arbiter: Arc<Arbiter<S>>,
        settings: SettingsStore,
        controller_still_addr: SocketAddr,
        preview_sink: Arc<dyn FrameSink>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(%addr, "command listener bound");
        Ok(Self {
            socket,
            arbiter,
            settings,
            controller_still_addr,
            preview_sink,
        })
    }

    /// Serve forever, dispatching one command per received datagram.
    pub async fn run(self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, from)) => self.dispatch(&buf[..len], from).await,
                Err(e) => warn!(error = %e, "command listener recv error"),
            }
        }
    }

    #[instrument(skip(self, payload), fields(%from))]
    async fn dispatch(&self, payload: &[u8], from: SocketAddr) {
        let Some(command) = Command::parse(payload) else {
            warn!(?from, "received unparseable or out-of-range command, ignoring");
            return;
        };
        debug!(?command, "dispatching command");
        if let Err(e) = self.handle(command).await {
            warn!(error = %e, "command handling failed");
        }
    }

    async fn handle(&self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::StartStream => {
                self.arbiter.start_preview(Arc::clone(&self.preview_sink)).await?;
            }
            Command::StopStream => {
                self.arbiter.stop_preview().await?;
            }
            Command::CaptureStill => {
                let arbiter = Arc::clone(&self.arbiter);
                let controller = self.controller_still_addr;
                tokio::spawn(async move {
                    if let Err(e) = still::capture_and_upload(&arbiter, controller).await {
                        warn!(error = %e, "still capture failed");
                    }
                });
            }
            Command::RestartStreamWithSettings => {
                self.arbiter.stop_preview().await?;
                self.arbiter.start_preview(Arc::clone(&self.preview_sink)).await?;
            }
            Command::SetQuality(quality) => {
                self.settings.update(|s| s.jpeg_quality = quality).await;
            }
            Command::SetCameraFlip { axis, value } => {
                let (_, changed) = self
                    .settings
                    .update(|s| match axis {
                        FlipAxis::Horizontal => s.flip_horizontal = value,
                        FlipAxis::Vertical => s.flip_vertical = value,
                    })
                    .await;
                self.maybe_restart(changed, false).await?;
            }
            Command::SetCameraGrayscale(value) => {
                self.settings.update(|s| s.grayscale = value).await;
            }
            Command::SetCameraRotation(degrees) => {
                if let Some(rotation) = Rotation::from_degrees(degrees) {
                    self.settings.update(|s| s.rotation = rotation).await;
                } else {
                    warn!(degrees, "rejected out-of-range rotation");
                }
            }
            Command::SetCameraCrop { field, value } => {
                self.settings
                    .update(|s| {
                        s.crop_enabled = true;
                        match field {
                            CropField::Enabled => s.crop_enabled = value != 0,
                            CropField::X => s.crop.x = value,
                            CropField::Y => s.crop.y = value,
                            CropField::Width => s.crop.width = value,
                            CropField::Height => s.crop.height = value,
                        }
                    })
                    .await;
            }
            Command::SetCameraField { field, value } => {
                self.apply_sensor_field(&field, &value).await?;
            }
            Command::SetAllSettings(json) => {
                let incoming: DeviceSettings = serde_json::from_value(json)?;
                self.settings.replace(incoming).await;
                self.arbiter.stop_preview().await?;
                self.arbiter.start_preview(Arc::clone(&self.preview_sink)).await?;
            }
            Command::ResetDefaults => {
                self.settings.replace(DeviceSettings::default()).await;
                self.arbiter.stop_preview().await?;
                self.arbiter.start_preview(Arc::clone(&self.preview_sink)).await?;
            }
            Command::SetTime(raw) => {
                match NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S") {
                    Ok(_) => info!(%raw, "received wall-clock push (best-effort, not applied to OS clock)"),
                    Err(e) => warn!(%raw, error = %e, "rejected malformed SET_TIME payload"),
                }
            }
            Command::Shutdown | Command::Reboot => {
                self.arbiter.stop_preview().await?;
                info!("stop requested before OS shutdown/reboot (invocation is out of scope)");
            }
        }
        Ok(())
    }

    /// Sensor-control fields restart the preview (`affects_sensor`); pure
    /// transform fields never do, so a flip command can never regress
    /// brightness by bouncing the sensor.
    async fn apply_sensor_field(&self, field: &str, value: &str) -> anyhow::Result<()> {
        if !DeviceSettings::affects_sensor(field) {
            warn!(field, "unknown SET_CAMERA field, ignoring");
            return Ok(());
        }
        let (_, changed) = self
            .settings
            .update(|s| apply_field(s, field, value))
            .await;
        self.maybe_restart(changed, true).await
    }

    async fn maybe_restart(&self, changed: bool, restart: bool) -> anyhow::Result<()> {
        if changed && restart {
            self.arbiter.stop_preview().await?;
            self.arbiter.start_preview(Arc::clone(&self.preview_sink)).await?;
        }
        Ok(())
    }
}

fn apply_field(settings: &mut DeviceSettings, field: &str, value: &str) {
    match field {
        "brightness" => {
            if let Ok(v) = value.parse() {
                settings.brightness = v;
            }
        }
        "contrast" => {
            if let Ok(v) = value.parse() {
                settings.contrast = v;
            }
        }
        "saturation" => {
            if let Ok(v) = value.parse() {
                settings.saturation = v;
            }
        }
        "iso" => {
            if let Ok(v) = value.parse() {
                settings.iso = v;
            }
        }
        "fps" => {
            if let Ok(v) = value.parse() {
                settings.fps = v;
            }
        }
        "resolution" => {
            if let Ok(v) = value.parse() {
                settings.resolution = v;
            }
        }
        "white_balance" => {
            if let Ok(v) = serde_json::from_value(serde_json::Value::String(value.to_string())) {
                settings.white_balance = v;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::MockSensor;

    async fn listener_for_test() -> (CommandListener<MockSensor>, Arc<Arbiter<MockSensor>>) {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::load(dir.path().join("settings.json")).await.unwrap();
        let arbiter = Arbiter::new(MockSensor::default(), settings.clone());
        struct NullSink;
        impl FrameSink for NullSink {
            fn send_frame(&self, _frame: &[u8]) -> std::io::Result<()> {
                Ok(())
            }
        }
        let listener = CommandListener {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            arbiter: Arc::clone(&arbiter),
            settings,
            controller_still_addr: "127.0.0.1:1".parse().unwrap(),
            preview_sink: Arc::new(NullSink),
        };
        (listener, arbiter)
    }

    #[tokio::test]
    async fn flip_change_never_restarts_preview() {
        let (listener, arbiter) = listener_for_test().await;
        arbiter.start_preview(Arc::new(NullSinkForAssert) as Arc<dyn FrameSink>).await.ok();
        listener
            .handle(Command::SetCameraFlip {
                axis: FlipAxis::Horizontal,
                value: true,
            })
            .await
            .unwrap();
        assert_eq!(listener.settings.snapshot().await.flip_horizontal, true);
    }

    #[tokio::test]
    async fn brightness_change_updates_settings() {
        let (listener, _arbiter) = listener_for_test().await;
        listener
            .handle(Command::SetCameraField {
                field: "brightness".to_string(),
                value: "15".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(listener.settings.snapshot().await.brightness, 15);
    }

    #[tokio::test]
    async fn unknown_sensor_field_is_ignored_without_error() {
        let (listener, _arbiter) = listener_for_test().await;
        listener
            .handle(Command::SetCameraField {
                field: "not_a_real_field".to_string(),
                value: "1".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_rotation_degrees_are_rejected() {
        let (listener, _arbiter) = listener_for_test().await;
        listener.handle(Command::SetCameraRotation(45)).await.unwrap();
        assert_eq!(listener.settings.snapshot().await.rotation, Rotation::Zero);
    }

    struct NullSinkForAssert;
    impl FrameSink for NullSinkForAssert {
        fn send_frame(&self, _frame: &[u8]) -> std::io::Result<()> {
            Ok(())
        }
    }
}
