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

use repcam::node::app::{self, NodeConfig};
use repcam::sensor::MockSensor;
use repcam::wire::PortProfile;

/// CLI flags. Every field but `config` and `local` is optional here, so a
/// flag the caller didn't pass falls through to the config file or
/// environment layer underneath instead of clobbering it with a default.
#[derive(Parser, Debug)]
#[command(name = "repcam-node", about = "One camera node's preview/still/command services")]
struct Args {
    /// Path to a TOML config file, layered under environment variables
    /// and beneath these CLI flags.
    #[arg(long)]
    config: Option<PathBuf>,

    /// This node's logical name, e.g. "rep1".
    #[arg(long)]
    logical_name: Option<String>,

    /// Address this node's services bind to.
    #[arg(long)]
    bind_ip: Option<IpAddr>,

    /// Address of the controller this node reports to.
    #[arg(long)]
    controller_ip: Option<IpAddr>,

    /// Whether this is the node co-located with the controller, which
    /// uses the local port profile instead of the remote one. Always a
    /// plain CLI switch; a fleet only has one local node so it isn't
    /// worth threading through the config file.
    #[arg(long)]
    local: bool,

    /// Path to this node's settings JSON file.
    #[arg(long)]
    settings_path: Option<PathBuf>,
}

impl Provider for Args {
    fn metadata(&self) -> Metadata {
        Metadata::named("command line arguments")
    }

    fn data(&self) -> Result<figment::value::Map<Profile, Dict>, FigmentError> {
        let mut data = Dict::new();
        if let Some(v) = &self.logical_name {
            data.insert("logical_name".to_string(), Value::from(v.clone()));
        }
        if let Some(v) = &self.bind_ip {
            data.insert("bind_ip".to_string(), Value::serialize(v.to_string())?);
        }
        if let Some(v) = &self.controller_ip {
            data.insert("controller_ip".to_string(), Value::serialize(v.to_string())?);
        }
        if let Some(v) = &self.settings_path {
            let text = v
                .to_str()
                .ok_or_else(|| "settings path isn't UTF-8".to_string())?;
            data.insert("settings_path".to_string(), Value::from(text));
        }
        Ok(Profile::Default.collect(data))
    }
}

/// The fields a node process needs, with defaults matching a freshly
/// imaged remote node.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
struct NodeSettings {
    logical_name: String,
    bind_ip: IpAddr,
    controller_ip: IpAddr,
    settings_path: PathBuf,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            logical_name: "rep1".to_string(),
            bind_ip: "0.0.0.0".parse().unwrap(),
            controller_ip: "192.168.0.200".parse().unwrap(),
            settings_path: PathBuf::from("settings.json"),
        }
    }
}

#[instrument(level = "debug", err)]
fn create_config() -> anyhow::Result<(NodeSettings, bool)> {
    let args = Args::parse();
    let mut figment = Figment::from(Serialized::defaults(NodeSettings::default()));
    if let Some(path) = &args.config {
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed("REPCAM_NODE_")).merge(&args);
    let settings: NodeSettings = figment.extract()?;
    Ok((settings, args.local))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_fmt::layer().with_ansi(true);
    Registry::default().with(filter).with(fmt_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let (settings, local) = create_config()?;
    let ports = if local { PortProfile::LOCAL } else { PortProfile::REMOTE };
    let config = NodeConfig {
        logical_name: settings.logical_name,
        bind_ip: settings.bind_ip,
        ports,
        controller_ip: settings.controller_ip,
        settings_path: settings.settings_path,
    };
    app::run(config, MockSensor::default()).await
}
