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

//! This library provisions simulated IoT network topologies inside a GNS3 emulation server.
//!
//! A topology is described declaratively as an ordered list of node descriptors attached to an
//! always-present backbone of three routers and three switches:
//!
//! ```text
//!             sNorth
//!               |
//!             rNorth
//!             /    \
//!  sWest -- rWest--rEast -- sEast
//! ```
//!
//! From that description, [`IotLab`] first computes a complete offline [`plan::TopologyPlan`]:
//! scene positions, switch-port assignments, cluster member addresses and the environment each
//! device container will receive. Nothing touches the platform until [`IotLab::connect`], which
//! materializes the plan into a project: create every node, wire every link, push interface
//! files and environment updates, then boot and provision the router images over their
//! consoles. [`IotLab::start_topology`] then boots the rest of the lab in dependency order.
//!
//! The main interaction is the [`IotLab`] structure. It uses a type parameter to distinguish an
//! offline lab from one connected to the platform; functions with side effects are only
//! available in the [`Active`] state.
//!
//! ```rust,no_run
//! use gns3_lab::{config::LabConfig, gns3::Gns3Client, topology::TopologySpec, IotLab};
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LabConfig::from_file("config.toml")?;
//! let spec = TopologySpec::from_file("topology.toml")?;
//!
//! // plan the topology offline
//! let lab = IotLab::new(&spec, &config)?;
//!
//! // materialize it on the platform and boot it
//! let mut lab = lab.connect(Gns3Client::new(&config.server)).await?;
//! lab.start_topology().await?;
//! # Ok(())
//! # }
//! ```

pub mod addressing;
pub mod config;
pub mod console;
pub mod env;
pub mod gns3;
pub mod plan;
pub mod startup;
pub mod topology;

#[cfg(test)]
mod test;

use std::collections::HashMap;

use ipnet::Ipv4Net;
use itertools::Itertools;
use thiserror::Error;

use addressing::AddressConflict;
use config::LabConfig;
use console::ConsoleError;
use env::Environment;
use gns3::{Emulator, Gns3Error, Project};
use plan::{IfaceConfig, NodeState, TopologyPlan};
use topology::TopologySpec;

pub use startup::{classify_for_startup, StartupTiers};

/// Error thrown while provisioning a lab.
#[derive(Debug, Error)]
pub enum LabError {
    /// The configuration or topology specification is inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The target project already holds nodes; refusing to materialize into it.
    #[error("Project {0} already holds {1} nodes; refusing to populate it")]
    NonEmptyTarget(String, usize),
    /// A cluster's derived addresses would cross the last-octet boundary.
    #[error("Cannot address {count} cluster members starting at {base}: range leaves the last octet")]
    AddressRange {
        /// Base interface address of the cluster.
        base: Ipv4Net,
        /// Requested number of members.
        count: u8,
    },
    /// Two or more interfaces share an address.
    #[error("Address collision: {}", .0.iter().join("; "))]
    AddressCollision(Vec<AddressConflict>),
    /// The emulation platform cannot be used at all.
    #[error("Emulation platform unavailable: {0}")]
    PlatformUnavailable(String),
    /// An operation was attempted on a node in the wrong lifecycle state.
    #[error("Cannot {action} node {node} in state {state:?}")]
    InvalidNodeState {
        /// The node the operation addressed.
        node: String,
        /// Its lifecycle state at the time.
        state: NodeState,
        /// The attempted operation.
        action: &'static str,
    },
    /// Error from the platform's control API.
    #[error("{0}")]
    Gns3(#[from] Gns3Error),
    /// Error on a router console.
    #[error("{0}")]
    Console(#[from] ConsoleError),
    /// I/O error (configuration scripts, specification files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Marker type for an [`IotLab`] that has not yet touched the platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inactive;

/// State of an [`IotLab`] connected to the platform.
#[derive(Debug)]
pub struct Active<E> {
    /// The platform client.
    pub(crate) client: E,
    /// The project holding the topology.
    pub(crate) project: Project,
    /// Template name to template id, resolved once at connect time.
    pub(crate) templates: HashMap<String, String>,
}

/// An IoT lab: a fully planned topology, either offline ([`Inactive`]) or materialized on the
/// emulation platform ([`Active`]).
///
/// Constructing the lab performs all planning and validation without side effects; the plan is
/// inspectable through [`IotLab::plan`] before anything is created. [`IotLab::connect`]
/// materializes the plan, [`IotLab::attach`] re-associates a plan with an already materialized
/// project, and [`IotLab::start_topology`](IotLab::start_topology) boots everything in
/// dependency order.
#[derive(Debug)]
pub struct IotLab<'a, S = Inactive> {
    pub(crate) spec: &'a TopologySpec,
    pub(crate) config: &'a LabConfig,
    pub(crate) plan: TopologyPlan,
    pub(crate) state: S,
}

impl<'a> IotLab<'a, Inactive> {
    /// Plan the complete topology offline. Fails on any specification inconsistency, address
    /// range overflow or address collision, without any platform interaction.
    pub fn new(spec: &'a TopologySpec, config: &'a LabConfig) -> Result<Self, LabError> {
        let plan = TopologyPlan::build(spec, config)?;
        log::debug!("planned {} nodes", plan.registry.len());
        Ok(Self {
            spec,
            config,
            plan,
            state: Inactive,
        })
    }

    /// Connect to the platform and materialize the plan: get or create the project, resolve all
    /// templates, then create every node, wire every link and configure every device. Unless
    /// `provision.auto_configure` is off, the routers are then booted and provisioned over
    /// their consoles, leaving the lab ready to start. The target project must be empty; a
    /// non-empty project fails with [`LabError::NonEmptyTarget`] before a single node is
    /// created.
    pub async fn connect<E: Emulator>(
        self,
        client: E,
    ) -> Result<IotLab<'a, Active<E>>, LabError> {
        let version = client
            .version()
            .await
            .map_err(|e| LabError::PlatformUnavailable(e.to_string()))?;
        log::info!("Connected to platform version {version}");
        client
            .check_compute()
            .await
            .map_err(|e| LabError::PlatformUnavailable(e.to_string()))?;

        let name = &self.config.project.name;
        let project = match client.project_by_name(name).await? {
            Some(project) => {
                client.open_project(&project).await?;
                let existing = client.list_nodes(&project).await?;
                if !existing.is_empty() {
                    return Err(LabError::NonEmptyTarget(name.clone(), existing.len()));
                }
                project
            }
            None => {
                client
                    .create_project(
                        name,
                        self.config.project.scene_width,
                        self.config.project.scene_height,
                        self.config.project.grid_unit,
                    )
                    .await?
            }
        };

        let templates = gns3::resolve_templates(
            &client.list_templates().await?,
            self.plan.registry.iter().map(|n| n.template.as_str()),
        )?;

        let mut lab = IotLab {
            spec: self.spec,
            config: self.config,
            plan: self.plan,
            state: Active {
                client,
                project,
                templates,
            },
        };
        lab.materialize().await?;
        if lab.config.provision.auto_configure {
            // consoles are only live on running nodes, so the routers come up now; later
            // startup runs leave them untouched
            lab.start_routers().await?;
            lab.provision_routers().await?;
        }
        Ok(lab)
    }

    /// Re-associate the plan with an already materialized project, e.g. to boot a topology that
    /// an earlier run created. Every planned node must exist on the platform under its planned
    /// name, and the platform must hold nothing else.
    pub async fn attach<E: Emulator>(
        self,
        client: E,
    ) -> Result<IotLab<'a, Active<E>>, LabError> {
        client
            .version()
            .await
            .map_err(|e| LabError::PlatformUnavailable(e.to_string()))?;
        client
            .check_compute()
            .await
            .map_err(|e| LabError::PlatformUnavailable(e.to_string()))?;

        let name = &self.config.project.name;
        let project = client
            .project_by_name(name)
            .await?
            .ok_or_else(|| LabError::Configuration(format!("project {name} does not exist")))?;
        client.open_project(&project).await?;

        let mut lab = IotLab {
            spec: self.spec,
            config: self.config,
            plan: self.plan,
            state: Active {
                client,
                project,
                templates: HashMap::new(),
            },
        };

        let existing = lab.state.client.list_nodes(&lab.state.project).await?;
        for handle in &existing {
            if !lab.plan.registry.contains(&handle.name) {
                return Err(LabError::Configuration(format!(
                    "project {name} holds node {}, which the topology does not describe",
                    handle.name
                )));
            }
        }
        if existing.len() != lab.plan.registry.len() {
            return Err(LabError::Configuration(format!(
                "project {name} holds {} of the {} planned nodes",
                existing.len(),
                lab.plan.registry.len()
            )));
        }
        for handle in existing {
            lab.plan.registry.get_mut(&handle.name)?.restore(handle.id);
        }
        log::info!("Attached to project {name}");
        Ok(lab)
    }
}

impl<'a, S> IotLab<'a, S> {
    /// The offline plan of this lab.
    pub fn plan(&self) -> &TopologyPlan {
        &self.plan
    }

    /// The topology specification this lab was planned from.
    pub fn spec(&self) -> &TopologySpec {
        self.spec
    }
}

impl<'a, E: Emulator> IotLab<'a, Active<E>> {
    /// Apply the plan to the (empty) project: create all nodes, wire the backbone and all
    /// uplinks, then configure every device container.
    async fn materialize(&mut self) -> Result<(), LabError> {
        log::info!("Creating {} nodes...", self.plan.registry.len());
        let creations: Vec<(String, String, (i32, i32))> = self
            .plan
            .registry
            .iter()
            .map(|n| (n.name.clone(), n.template.clone(), n.position))
            .collect();
        for (name, template, (x, y)) in creations {
            let template_id = self
                .state
                .templates
                .get(&template)
                .ok_or_else(|| {
                    LabError::Configuration(format!("unresolved template {template}"))
                })?
                .clone();
            let handle = self
                .state
                .client
                .create_node(&self.state.project, &template_id, &name, x, y)
                .await?;
            self.plan.registry.get_mut(&name)?.mark_created(handle.id)?;
        }

        log::info!("Wiring links...");
        let backbone = self.plan.backbone_links.clone();
        for (a, port_a, b, port_b) in backbone {
            self.wire(&a, port_a, &b, port_b).await?;
        }
        let uplinks: Vec<(String, String, u32, u32)> = self
            .plan
            .registry
            .iter()
            .filter_map(|n| {
                let link = n.link.as_ref()?;
                Some((
                    link.parent.clone(),
                    n.name.clone(),
                    link.parent_port,
                    link.local_port,
                ))
            })
            .collect();
        for (parent, child, parent_port, local_port) in uplinks {
            self.wire(&parent, parent_port, &child, local_port).await?;
        }

        log::info!("Configuring devices...");
        let devices: Vec<String> = self
            .plan
            .registry
            .iter()
            .filter(|n| n.iface.is_some())
            .map(|n| n.name.clone())
            .collect();
        for name in devices {
            self.configure_device(&name).await?;
        }
        Ok(())
    }

    /// Wire one link between two planned nodes and record the transition on both ends.
    async fn wire(
        &mut self,
        a: &str,
        port_a: u32,
        b: &str,
        port_b: u32,
    ) -> Result<(), LabError> {
        let id_a = self.plan.registry.get(a)?.id()?.to_string();
        let id_b = self.plan.registry.get(b)?.id()?.to_string();
        self.state
            .client
            .create_link(&self.state.project, &id_a, port_a, &id_b, port_b)
            .await?;
        self.plan.registry.get_mut(a)?.mark_linked()?;
        self.plan.registry.get_mut(b)?.mark_linked()
    }

    /// Push the static interface file and the environment updates of one device container, and
    /// the extra-hosts records if the device is the lab resolver.
    async fn configure_device(&mut self, name: &str) -> Result<(), LabError> {
        let node = self.plan.registry.get(name)?;
        let id = node.id()?.to_string();
        let iface = node.iface.expect("only called for device nodes");
        let env_updates = node.env.clone();

        self.state
            .client
            .write_node_file(
                &self.state.project,
                &id,
                "etc/network/interfaces",
                &interfaces_file(&iface),
            )
            .await?;

        if !env_updates.is_empty() {
            // read-modify-write: keep whatever keys the image already defines
            let raw = self
                .state
                .client
                .node_environment(&self.state.project, &id)
                .await?;
            let mut environment = Environment::parse(&raw);
            environment.apply(&env_updates);
            self.state
                .client
                .set_node_environment(&self.state.project, &id, &environment.encode())
                .await?;
        }

        if name == "dns" && !self.plan.extra_hosts.is_empty() {
            self.state
                .client
                .set_node_extra_hosts(&self.state.project, &id, &self.plan.extra_hosts.encode())
                .await?;
        }

        self.plan.registry.get_mut(name)?.mark_configured()
    }

    /// Leave the platform and return to the offline state. The materialized project is left
    /// untouched.
    pub fn disconnect(self) -> IotLab<'a, Inactive> {
        IotLab {
            spec: self.spec,
            config: self.config,
            plan: self.plan,
            state: Inactive,
        }
    }
}

/// Render the `etc/network/interfaces` file of a device: a static `eth0` with the planned
/// address, and a nameserver pushed into `/etc/resolv.conf` when the interface comes up.
fn interfaces_file(iface: &IfaceConfig) -> String {
    format!(
        "auto eth0\n\
         iface eth0 inet static\n\
         \taddress {}\n\
         \tnetmask {}\n\
         \tgateway {}\n\
         \tup echo \"nameserver {}\" > /etc/resolv.conf\n",
        iface.block.iface.addr(),
        iface.block.iface.netmask(),
        iface.block.gateway,
        iface.nameserver,
    )
}
