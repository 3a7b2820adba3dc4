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

//! The declarative topology specification.
//!
//! A topology is an ordered list of [`NodeDescriptor`] entries processed strictly in declaration
//! order: every entry attaches to a parent that was declared before it (or to the backbone, which
//! always exists). The specification is plain data, usually loaded from a TOML file; see
//! `src/test/config/topology.toml` for a complete scenario.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::{collections::HashSet, net::Ipv4Addr, path::Path};

use ipnet::Ipv4Net;

use crate::{addressing::AddressBlock, LabError};

/// Names of the three always-present backbone routers and their switches. Every topology starts
/// from this core transit layer; descriptors may attach to the three switches (or to each other).
pub const BACKBONE_ROUTERS: [&str; 3] = ["rNorth", "rWest", "rEast"];
/// Names of the three backbone switches. Port 0 of each switch carries the router uplink, so the
/// first free port for attaching children is port 1.
pub const BACKBONE_SWITCHES: [&str; 3] = ["sNorth", "sWest", "sEast"];

/// What a topology entry materializes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A routed zone gateway (VM image, provisioned over its console).
    Router,
    /// A layer-2 switch.
    Switch,
    /// A single container with a static interface address.
    Host,
    /// `count` homogeneous device containers behind a fresh local switch.
    Cluster,
    /// An off-site aggregation endpoint paired with a previously declared cluster.
    Cloud,
}

/// The startup tier of a device-backed node. Carried explicitly on each descriptor so that the
/// startup sequencer is a plain partition instead of a name-pattern match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Infrastructure every other device depends on (DNS, NTP). Started first.
    CoreService,
    /// Brokers and aggregation servers devices connect to. Started second.
    Server,
    /// Sensors, actuators, attacker tooling. Started last, sorted by name.
    Leaf,
}

/// One entry of the topology specification.
///
/// The optional fields are kind-specific: `ip`/`gw` for hosts, clouds and clusters; `count`,
/// `broker`, `auth` and `tls` for clusters; `cluster` for clouds (the name of the paired
/// cluster). [`TopologySpec::validate`] rejects contradictory combinations.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDescriptor {
    /// What to materialize.
    pub kind: NodeKind,
    /// Unique name, used as the registry key for the lifetime of the run.
    pub name: String,
    /// Horizontal layout position, in grid units relative to the scene origin.
    pub x: i32,
    /// Vertical layout position, in grid units relative to the scene origin.
    pub y: i32,
    /// Name of the node this entry attaches to. Must be declared earlier (or be the backbone).
    pub parent: String,
    /// Name of the platform template to instantiate. Resolved once at connect time.
    pub template: String,
    /// Static interface assignment for device-backed nodes.
    #[serde(flatten)]
    pub ip: Option<AddressBlock>,
    /// Startup tier. Required for hosts, clusters and clouds; meaningless for routers/switches.
    pub role: Option<Role>,
    /// Cluster size. Required for clusters, must be at least 1.
    pub count: Option<u8>,
    /// Broker hostname injected into cluster devices (`MQTT_BROKER_ADDR`).
    pub broker: Option<String>,
    /// `user:password` credential injected into cluster devices (`MQTT_AUTH`).
    pub auth: Option<String>,
    /// Whether cluster devices talk TLS to their broker (`TLS`).
    #[serde(default)]
    pub tls: bool,
    /// For clouds: the name of the cluster whose member addresses this endpoint aggregates.
    pub cluster: Option<String>,
}

/// Templates used for the backbone core.
#[derive(Debug, Clone, Deserialize)]
pub struct BackboneSpec {
    /// Platform template for the three backbone routers.
    pub router_template: String,
    /// Platform template for the three backbone switches.
    pub switch_template: String,
}

/// The complete, ordered topology specification.
#[derive(Debug, Clone, Deserialize)]
pub struct TopologySpec {
    /// The always-present core transit layer.
    pub backbone: BackboneSpec,
    /// All remaining entries, processed strictly in this order.
    #[serde(rename = "node", default)]
    pub nodes: Vec<NodeDescriptor>,
}

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]*$").unwrap();
}

impl TopologySpec {
    /// Parse a specification from its TOML representation and validate it.
    pub fn from_str(raw: &str) -> Result<Self, LabError> {
        let spec: TopologySpec = toml::from_str(raw)
            .map_err(|e| LabError::Configuration(format!("cannot parse topology: {e}")))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Read and parse a specification from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LabError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_str(&raw)
    }

    /// Check the specification for internal consistency: unique well-formed names, parents
    /// declared before their children, and kind-specific fields present exactly where they
    /// belong. Any violation is fatal before a single node is created.
    pub fn validate(&self) -> Result<(), LabError> {
        let err = |msg: String| Err(LabError::Configuration(msg));

        let mut known: HashSet<&str> = BACKBONE_ROUTERS
            .iter()
            .chain(BACKBONE_SWITCHES.iter())
            .copied()
            .collect();
        let mut clusters: HashSet<&str> = HashSet::new();

        for node in &self.nodes {
            let name = node.name.as_str();
            if !NAME_RE.is_match(name) {
                return err(format!("invalid node name: {name:?}"));
            }
            if !known.insert(name) {
                return err(format!("duplicate node name: {name}"));
            }
            if !known.contains(node.parent.as_str()) {
                return err(format!(
                    "node {name} attaches to {}, which is not declared before it",
                    node.parent
                ));
            }
            match node.kind {
                NodeKind::Router | NodeKind::Switch => {
                    if node.ip.is_some() || node.role.is_some() {
                        return err(format!("{name}: routers and switches carry no ip or role"));
                    }
                }
                NodeKind::Host => {
                    if node.ip.is_none() {
                        return err(format!("host {name} is missing its ip/gw assignment"));
                    }
                    if node.role.is_none() {
                        return err(format!("host {name} is missing its startup role"));
                    }
                }
                NodeKind::Cluster => {
                    if node.ip.is_none() {
                        return err(format!("cluster {name} is missing its base ip/gw"));
                    }
                    if node.role.is_none() {
                        return err(format!("cluster {name} is missing its startup role"));
                    }
                    match node.count {
                        None => return err(format!("cluster {name} is missing its size")),
                        Some(0) => return err(format!("cluster {name} has zero members")),
                        Some(_) => {}
                    }
                    clusters.insert(name);
                }
                NodeKind::Cloud => {
                    if node.ip.is_none() {
                        return err(format!("cloud {name} is missing its ip/gw assignment"));
                    }
                    if node.role.is_none() {
                        return err(format!("cloud {name} is missing its startup role"));
                    }
                    match node.cluster.as_deref() {
                        None => {
                            return err(format!("cloud {name} does not name its paired cluster"))
                        }
                        Some(c) if !clusters.contains(c) => {
                            return err(format!(
                                "cloud {name} pairs with {c}, which is not a previously declared cluster"
                            ))
                        }
                        Some(_) => {}
                    }
                }
            }
            if node.kind != NodeKind::Cluster
                && (node.count.is_some() || node.broker.is_some() || node.auth.is_some())
            {
                return err(format!("{name}: count/broker/auth are cluster-only fields"));
            }
        }
        Ok(())
    }

    /// Look up a descriptor by name.
    pub fn get(&self, name: &str) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

impl NodeDescriptor {
    /// The interface assignment, for kinds that carry one.
    pub fn address(&self) -> Option<(Ipv4Net, Ipv4Addr)> {
        self.ip.map(|b| (b.iface, b.gateway))
    }
}
