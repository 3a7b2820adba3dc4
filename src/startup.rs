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

//! Tiered startup sequencing.
//!
//! Devices boot in dependency order: core services (DNS, NTP) first, then the servers devices
//! connect to, then everything else. The classification is a plain partition over the explicit
//! [`Role`] tags of the registry; nothing here inspects node names. Starting the whole fleet at
//! once overwhelms the platform's container runtime, so individual starts are paced.

use std::time::Duration;

use tokio::time::sleep;

use crate::{
    gns3::Emulator,
    plan::{NodeRegistry, NodeState},
    topology::{NodeKind, Role},
    Active, IotLab, LabError,
};

/// The three startup tiers of a topology, each holding node names in start order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupTiers {
    /// Infrastructure everything else depends on. Plan order.
    pub core: Vec<String>,
    /// Brokers and aggregation endpoints. Plan order.
    pub servers: Vec<String>,
    /// All remaining devices, sorted by name.
    pub leaves: Vec<String>,
}

/// Partition every device-backed node of the registry into its startup tier. A device without a
/// role tag is a planning bug and fails the whole classification; routers and switches are
/// sequenced separately and do not appear in any tier.
pub fn classify_for_startup(registry: &NodeRegistry) -> Result<StartupTiers, LabError> {
    let mut core = Vec::new();
    let mut servers = Vec::new();
    let mut leaves = Vec::new();

    for node in registry.iter() {
        match (node.kind, node.role) {
            (NodeKind::Router | NodeKind::Switch, _) => {}
            (_, Some(Role::CoreService)) => core.push(node.name.clone()),
            (_, Some(Role::Server)) => servers.push(node.name.clone()),
            (_, Some(Role::Leaf)) => leaves.push(node.name.clone()),
            (_, None) => {
                return Err(LabError::Configuration(format!(
                    "device {} has no startup role",
                    node.name
                )))
            }
        }
    }
    leaves.sort();

    Ok(StartupTiers {
        core,
        servers,
        leaves,
    })
}

impl<'a, E: Emulator> IotLab<'a, Active<E>> {
    /// Bring up every router that is not already running, then let their routing daemons
    /// converge. Routers that [`IotLab::connect`] already started during provisioning are
    /// skipped, and the convergence wait is skipped with them.
    pub(crate) async fn start_routers(&mut self) -> Result<(), LabError> {
        let pacing = Duration::from_millis(self.config.provision.pacing_millis);
        let routers: Vec<String> = self.names_of_kind(NodeKind::Router);
        log::info!("Starting {} routers...", routers.len());
        let mut started_any = false;
        for name in &routers {
            if self.plan.registry.get(name)?.state == NodeState::Started {
                log::debug!("[{name}] already running");
                continue;
            }
            self.start_one(name).await?;
            started_any = true;
            sleep(pacing).await;
        }
        if started_any {
            // let the routing daemons converge before anything sends traffic
            sleep(Duration::from_secs(self.config.provision.router_start_secs)).await;
        }
        Ok(())
    }

    /// Start the entire topology in dependency order: routers (with a settling period for their
    /// routing daemons), then switches, then the three device tiers with paced starts.
    pub async fn start_topology(&mut self) -> Result<(), LabError> {
        let pacing = Duration::from_millis(self.config.provision.pacing_millis);

        let switches: Vec<String> = self.names_of_kind(NodeKind::Switch);

        self.start_routers().await?;

        log::info!("Starting {} switches...", switches.len());
        for name in &switches {
            self.start_one(name).await?;
            sleep(pacing).await;
        }

        let tiers = classify_for_startup(&self.plan.registry)?;
        log::info!(
            "Starting devices: {} core, {} servers, {} leaves",
            tiers.core.len(),
            tiers.servers.len(),
            tiers.leaves.len()
        );
        for name in tiers
            .core
            .iter()
            .chain(tiers.servers.iter())
            .chain(tiers.leaves.iter())
        {
            self.start_one(name).await?;
            sleep(pacing).await;
        }

        log::info!("Topology is up");
        Ok(())
    }

    /// Start a single node and record the transition.
    async fn start_one(&mut self, name: &str) -> Result<(), LabError> {
        log::debug!("[{name}] starting");
        let id = self.plan.registry.get(name)?.id()?.to_string();
        self.state.client.start_node(&self.state.project, &id).await?;
        self.plan.registry.get_mut(name)?.mark_started()
    }

    fn names_of_kind(&self, kind: NodeKind) -> Vec<String> {
        self.plan
            .registry
            .iter()
            .filter(|n| n.kind == kind)
            .map(|n| n.name.clone())
            .collect()
    }
}
