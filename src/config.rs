// Gns3Lab: IoT network lab provisioning for GNS3
// Copyright (C) 2023 The gns3-lab developers
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! This module contains the code for reading the configuration.
//!
//! The configuration is a single TOML file read once at startup. It is handed around as an
//! immutable [`LabConfig`] reference; nothing in this crate looks configuration up ambiently.

use std::{net::Ipv4Addr, path::Path, path::PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::LabError;

/// The complete lab configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LabConfig {
    /// How to reach the emulation platform.
    pub server: ServerConfig,
    /// The project that will hold the topology.
    pub project: ProjectConfig,
    /// Scenario-wide simulation settings.
    pub sim: SimConfig,
    /// Router provisioning behavior.
    pub provision: ProvisionConfig,
    /// Cosmetic layout parameters.
    #[serde(default)]
    pub layout: LayoutConfig,
}

impl LabConfig {
    /// Read and parse the configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LabError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: LabConfig = toml::from_str(&raw)
            .map_err(|e| LabError::Configuration(format!("cannot parse {}: {e}", path.display())))?;
        Ok(config)
    }
}

/// How to reach the emulation platform's control API.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Hostname or address of the platform server.
    pub host: String,
    /// TCP port of the control API.
    pub port: u16,
    /// HTTP basic-auth user.
    pub user: String,
    /// HTTP basic-auth password.
    pub password: String,
}

impl ServerConfig {
    /// Base URL of the control API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/v2", self.host, self.port)
    }
}

/// The platform project that will hold the materialized topology.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Project name. Created if it does not exist; refused if it exists and is non-empty.
    pub name: String,
    /// Scene width in pixels.
    #[serde(default = "default_scene_width")]
    pub scene_width: u32,
    /// Scene height in pixels.
    #[serde(default = "default_scene_height")]
    pub scene_height: u32,
    /// Size of one grid unit in pixels. All descriptor positions are multiples of this.
    #[serde(default = "default_grid_unit")]
    pub grid_unit: u32,
}

fn default_scene_width() -> u32 {
    5000
}

fn default_scene_height() -> u32 {
    7500
}

fn default_grid_unit() -> u32 {
    15
}

/// A static DNS record served by the lab resolver for the core services.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticHost {
    /// Fully qualified name, e.g. `broker.urbano.lab.local`.
    pub name: String,
    /// Address the name resolves to.
    pub addr: Ipv4Addr,
}

/// Scenario-wide simulation settings, shared by every device in the topology.
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    /// Address of the lab DNS server, pushed as nameserver into every device.
    pub lab_dns_addr: Ipv4Addr,
    /// Local DNS domain of the lab.
    #[serde(deserialize_with = "deserialize_domain")]
    pub local_domain: String,
    /// Hostname of the NTP server injected into TLS-capable devices, if the scenario has one.
    pub ntp_server: Option<String>,
    /// Static records pushed to the DNS node as extra hosts.
    #[serde(default)]
    pub static_hosts: Vec<StaticHost>,
}

/// Router provisioning behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionConfig {
    /// Install and configure router images automatically over their consoles.
    #[serde(default = "default_true")]
    pub auto_configure: bool,
    /// Install the router image to disk before configuring it.
    #[serde(default = "default_true")]
    pub install_image: bool,
    /// Console login user of the router image.
    #[serde(default = "default_router_user")]
    pub router_user: String,
    /// Console login password of the router image.
    #[serde(default = "default_router_user")]
    pub router_password: String,
    /// Directory holding the configuration scripts of the three backbone routers
    /// (`<name>.sh` per router).
    pub backbone_config_dir: PathBuf,
    /// Directory holding the configuration scripts of the zone routers (`<name>.sh` per router).
    pub zone_config_dir: PathBuf,
    /// Seconds to wait after each provisioning step for the console to settle.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    /// Seconds to wait after starting all routers before anything else boots.
    #[serde(default = "default_router_start_secs")]
    pub router_start_secs: u64,
    /// Milliseconds between individual node starts, to pace the platform.
    #[serde(default = "default_pacing_millis")]
    pub pacing_millis: u64,
}

fn default_true() -> bool {
    true
}

fn default_router_user() -> String {
    "vyos".to_string()
}

fn default_settle_secs() -> u64 {
    10
}

fn default_router_start_secs() -> u64 {
    30
}

fn default_pacing_millis() -> u64 {
    100
}

/// Cosmetic layout parameters for cluster rendering. No functional effect.
#[derive(Debug, Clone, Deserialize)]
pub struct LayoutConfig {
    /// Vertical distance in pixels between stacked cluster devices.
    pub cluster_vertical_spacing: i32,
    /// Horizontal offset of the local cluster switch from its devices, in grid units.
    pub cluster_horizontal_spacing: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            cluster_vertical_spacing: 5,
            cluster_horizontal_spacing: 1.5,
        }
    }
}

fn deserialize_domain<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lazy_static! {
        static ref DOMAIN_RE: Regex =
            Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)*$")
                .unwrap();
    }
    let domain = String::deserialize(de)?;
    if DOMAIN_RE.is_match(&domain) {
        Ok(domain)
    } else {
        Err(serde::de::Error::custom(format!(
            "invalid local domain: {domain:?}"
        )))
    }
}
