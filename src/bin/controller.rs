// SPDX-License-Identifier: GPL-3.0-or-later
use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::value::{Dict, Value};
use figment::{Error as FigmentError, Figment, Metadata, Profile, Provider};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

use repcam::controller::app::{self, ControllerConfig};
use repcam::controller::config::{NodeEntry, NodeRegistry};
use repcam::controller::display::LoggingDisplay;
use repcam::wire::PortProfile;

/// One registry row as it appears in the controller's TOML config file,
/// e.g.:
/// ```toml
/// [[nodes]]
/// logical_name = "rep1"
/// address = "192.168.0.201"
/// local = false
/// ```
#[derive(Clone, Debug, Deserialize)]
struct NodeRow {
    logical_name: String,
    address: IpAddr,
    #[serde(default)]
    local: bool,
}

/// CLI flags. Every field but `config` is optional so an unset flag
/// falls through to the config file or environment layer beneath it
/// instead of overriding it with a default.
#[derive(Parser, Debug)]
#[command(name = "repcam-controller", about = "Fleet-wide video ingress, still capture, and liveness")]
struct Args {
    /// Path to a TOML config file declaring the node registry and bind
    /// address (the registry has no CLI-flag equivalent, since a fleet
    /// of eight addresses doesn't fit comfortably on a command line).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the controller's ingress sockets bind to.
    #[arg(long)]
    bind_ip: Option<IpAddr>,

    /// Base directory captured stills are written under.
    #[arg(long)]
    image_base_dir: Option<PathBuf>,

    /// Fallback directory used when the base directory is unwritable.
    #[arg(long)]
    image_fallback_dir: Option<PathBuf>,
}

impl Provider for Args {
    fn metadata(&self) -> Metadata {
        Metadata::named("command line arguments")
    }

    fn data(&self) -> Result<figment::value::Map<Profile, Dict>, FigmentError> {
        let mut data = Dict::new();
        if let Some(v) = &self.bind_ip {
            data.insert("bind_ip".to_string(), Value::serialize(v.to_string())?);
        }
        if let Some(v) = &self.image_base_dir {
            let text = v
                .to_str()
                .ok_or_else(|| "image_base_dir isn't UTF-8".to_string())?;
            data.insert("image_base_dir".to_string(), Value::from(text));
        }
        if let Some(v) = &self.image_fallback_dir {
            let text = v
                .to_str()
                .ok_or_else(|| "image_fallback_dir isn't UTF-8".to_string())?;
            data.insert("image_fallback_dir".to_string(), Value::from(text));
        }
        Ok(Profile::Default.collect(data))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ControllerSettings {
    bind_ip: IpAddr,
    image_base_dir: PathBuf,
    image_fallback_dir: PathBuf,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".parse().unwrap(),
            image_base_dir: PathBuf::from("captured_images"),
            image_fallback_dir: PathBuf::from("/tmp/repcam-captured-images"),
        }
    }
}

#[derive(Deserialize)]
struct FileConfig {
    #[serde(default)]
    nodes: Vec<NodeRow>,
}

#[instrument(level = "debug", err)]
fn create_config() -> anyhow::Result<(ControllerSettings, Vec<NodeRow>)> {
    let args = Args::parse();
    let file_figment = match &args.config {
        Some(path) => Figment::new().merge(Toml::file(path)),
        None => Figment::new(),
    };
    let nodes = file_figment
        .extract::<FileConfig>()
        .map(|f| f.nodes)
        .unwrap_or_default();

    let mut settings_figment = Figment::from(Serialized::defaults(ControllerSettings::default()));
    if let Some(path) = &args.config {
        settings_figment = settings_figment.merge(Toml::file(path));
    }
    settings_figment = settings_figment
        .merge(Env::prefixed("REPCAM_CONTROLLER_"))
        .merge(&args);
    let settings: ControllerSettings = settings_figment.extract()?;
    Ok((settings, nodes))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_fmt::layer().with_ansi(true);
    Registry::default().with(filter).with(fmt_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let (settings, nodes) = create_config()?;

    let local_node_name = nodes
        .iter()
        .find(|n| n.local)
        .map(|n| n.logical_name.clone())
        .unwrap_or_default();

    let registry = NodeRegistry::new(nodes.into_iter().map(|n| NodeEntry {
        ports: if n.local { PortProfile::LOCAL } else { PortProfile::REMOTE },
        logical_name: n.logical_name,
        address: n.address,
    }));

    let config = ControllerConfig {
        bind_ip: settings.bind_ip,
        image_base_dir: settings.image_base_dir,
        image_fallback_dir: settings.image_fallback_dir,
        local_node_name,
    };

    app::run(config, registry, std::sync::Arc::new(LoggingDisplay)).await
}
