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

//! Offline topology planning: turning the declarative specification into a fully allocated
//! [`NodeRegistry`].
//!
//! Planning walks the specification strictly in declaration order and performs all bookkeeping
//! that must not collide: switch-port allocation (one counter per node, monotonically
//! increasing), cluster address derivation (one contiguous last-octet range per cluster), layout
//! positions, and the environment updates each device will receive. No platform call happens
//! here; the resulting [`TopologyPlan`] is applied to the emulator by
//! [`IotLab::connect`](crate::IotLab::connect).

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::{
    addressing::{
        check_no_collisions, derive_cluster_addresses, range_string, AddressBlock, AddressConflict,
    },
    config::LabConfig,
    env::{EnvKey, ExtraHosts},
    topology::{NodeDescriptor, NodeKind, Role, TopologySpec, BACKBONE_ROUTERS, BACKBONE_SWITCHES},
    LabError,
};

/// Lifecycle of a single node during one orchestration run. Operations on a node are only valid
/// from the appropriate preceding state; a call out of order fails fast instead of producing a
/// half-wired topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Allocated in the plan, not yet created on the platform.
    Planned,
    /// The platform node exists.
    Created,
    /// At least one link endpoint is wired up.
    Linked,
    /// Interface address and environment have been written.
    Configured,
    /// The node is running.
    Started,
}

/// The uplink of a node towards its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLink {
    /// Name of the parent node.
    pub parent: String,
    /// Port on the parent side, allocated from the parent's counter.
    pub parent_port: u32,
    /// Port on this node's side.
    pub local_port: u32,
}

/// Static interface configuration for a device-backed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfaceConfig {
    /// Address and gateway of `eth0`.
    pub block: AddressBlock,
    /// Nameserver written into the device. The DNS node itself resolves locally.
    pub nameserver: Ipv4Addr,
}

/// One fully planned node: everything the materialization loop needs to create, link and
/// configure it, plus its lifecycle state.
#[derive(Debug, Clone)]
pub struct PlannedNode {
    /// Unique name, the registry key.
    pub name: String,
    /// What the node is.
    pub kind: NodeKind,
    /// Startup tier for device-backed nodes.
    pub role: Option<Role>,
    /// Platform template name, resolved to an id at connect time.
    pub template: String,
    /// Absolute scene position in pixels.
    pub position: (i32, i32),
    /// Uplink towards the parent. Backbone nodes are wired through
    /// [`TopologyPlan::backbone_links`] instead.
    pub link: Option<PlannedLink>,
    /// Interface assignment, if the node carries one.
    pub iface: Option<IfaceConfig>,
    /// Environment updates to inject after linking. Empty values are written as present-but-blank.
    pub env: BTreeMap<EnvKey, String>,
    /// Lifecycle state.
    pub state: NodeState,
    /// Platform node id, known once created.
    pub node_id: Option<String>,
    /// The next unused port on this node.
    next_port: u32,
}

impl PlannedNode {
    fn new(
        name: impl Into<String>,
        kind: NodeKind,
        template: impl Into<String>,
        position: (i32, i32),
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            role: None,
            template: template.into(),
            position,
            link: None,
            iface: None,
            env: BTreeMap::new(),
            state: NodeState::Planned,
            node_id: None,
            next_port: 0,
        }
    }

    fn transition(&mut self, to: NodeState, action: &'static str) -> Result<(), LabError> {
        let valid = matches!(
            (self.state, to),
            (NodeState::Planned, NodeState::Created)
                | (NodeState::Created, NodeState::Linked)
                | (NodeState::Linked, NodeState::Linked)
                | (NodeState::Linked, NodeState::Configured)
                | (NodeState::Linked, NodeState::Started)
                | (NodeState::Configured, NodeState::Started)
        );
        if valid {
            self.state = to;
            Ok(())
        } else {
            Err(LabError::InvalidNodeState {
                node: self.name.clone(),
                state: self.state,
                action,
            })
        }
    }

    /// Record the platform node id once the node exists.
    pub(crate) fn mark_created(&mut self, id: String) -> Result<(), LabError> {
        self.transition(NodeState::Created, "create")?;
        self.node_id = Some(id);
        Ok(())
    }

    /// Record that a link endpoint of this node has been wired up.
    pub(crate) fn mark_linked(&mut self) -> Result<(), LabError> {
        self.transition(NodeState::Linked, "link")
    }

    /// Record that address and environment have been written.
    pub(crate) fn mark_configured(&mut self) -> Result<(), LabError> {
        self.transition(NodeState::Configured, "configure")
    }

    /// Record that the node is running.
    pub(crate) fn mark_started(&mut self) -> Result<(), LabError> {
        self.transition(NodeState::Started, "start")
    }

    /// Re-associate a planned node with an already materialized platform node.
    pub(crate) fn restore(&mut self, id: String) {
        self.node_id = Some(id);
        self.state = NodeState::Configured;
    }

    /// The platform node id. Fails if the node has not been created yet.
    pub fn id(&self) -> Result<&str, LabError> {
        self.node_id.as_deref().ok_or(LabError::InvalidNodeState {
            node: self.name.clone(),
            state: self.state,
            action: "address by id",
        })
    }
}

/// The single shared owner of all materialized nodes and their port counters. Entries are
/// append-only: once inserted, a node is never removed or renamed during a run. Every component
/// that wires a link allocates the endpoint port through [`NodeRegistry::next_port`], so no port
/// is ever handed out twice.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: Vec<PlannedNode>,
    index: HashMap<String, usize>,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, node: PlannedNode) -> Result<(), LabError> {
        if self.index.contains_key(&node.name) {
            return Err(LabError::Configuration(format!(
                "duplicate node name: {}",
                node.name
            )));
        }
        self.index.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Return the lowest unused port of the named node and advance its counter. Consecutive calls
    /// for the same node return strictly increasing, pairwise distinct ports.
    pub fn next_port(&mut self, name: &str) -> Result<u32, LabError> {
        let node = self.get_mut(name)?;
        let port = node.next_port;
        node.next_port += 1;
        Ok(port)
    }

    /// Seed the port counter of the named node. Backbone switches start at port 1 because port 0
    /// is pre-wired to their router uplink.
    pub fn reserve_initial(&mut self, name: &str, start_port: u32) -> Result<(), LabError> {
        self.get_mut(name)?.next_port = start_port;
        Ok(())
    }

    /// Look up a node by name.
    pub fn get(&self, name: &str) -> Result<&PlannedNode, LabError> {
        self.index
            .get(name)
            .map(|i| &self.nodes[*i])
            .ok_or_else(|| LabError::Configuration(format!("unknown node: {name}")))
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Result<&mut PlannedNode, LabError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| LabError::Configuration(format!("unknown node: {name}")))?;
        Ok(&mut self.nodes[idx])
    }

    /// Whether the registry holds a node with this name.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All nodes, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &PlannedNode> {
        self.nodes.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlannedNode> {
        self.nodes.iter_mut()
    }

    /// Number of nodes in the registry.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every assigned interface address, paired with its node name.
    pub fn ifaces(&self) -> impl Iterator<Item = (&str, Ipv4Addr)> {
        self.nodes
            .iter()
            .filter_map(|n| Some((n.name.as_str(), n.iface?.block.iface.addr())))
    }
}

/// What a cluster allocated, remembered so that its paired cloud endpoint can later reconstruct
/// the full member address list. Written once, read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterRecord {
    /// Base interface address of the first member.
    pub base: Ipv4Net,
    /// Number of members.
    pub count: u8,
    /// Whether the cluster talks TLS; its cloud endpoint then authenticates with a PSK.
    pub tls: bool,
}

/// A fully allocated topology, ready to be applied to the platform.
#[derive(Debug, Clone)]
pub struct TopologyPlan {
    /// All planned nodes and their port counters.
    pub registry: NodeRegistry,
    /// Address blocks of all clusters, by cluster name.
    pub clusters: HashMap<String, ClusterRecord>,
    /// The fixed links of the core transit layer, as `(node_a, port_a, node_b, port_b)`.
    pub backbone_links: Vec<(String, u32, String, u32)>,
    /// Static DNS records for the resolver node.
    pub extra_hosts: ExtraHosts,
}

impl TopologyPlan {
    /// Allocate the whole topology. Walks the backbone first, then every descriptor in
    /// declaration order, and finally checks that no two interfaces share an address. Fails
    /// without side effects; nothing has touched the platform yet.
    pub fn build(spec: &TopologySpec, config: &LabConfig) -> Result<Self, LabError> {
        spec.validate()?;

        let g = config.project.grid_unit as i32;
        let mut registry = NodeRegistry::new();
        let mut clusters: HashMap<String, ClusterRecord> = HashMap::new();

        // The core transit layer: three routers in a triangle, one switch each. Port 0 of every
        // router goes to its switch, ports 1 and 2 to the other routers.
        let router_pos = [(0, 0), (-2 * g, 4 * g), (2 * g, 4 * g)];
        let switch_pos = [(0, -4 * g), (-6 * g, 4 * g), (6 * g, 4 * g)];
        for (name, pos) in BACKBONE_ROUTERS.iter().zip(router_pos) {
            registry.insert(PlannedNode::new(
                *name,
                NodeKind::Router,
                &spec.backbone.router_template,
                pos,
            ))?;
        }
        for (name, pos) in BACKBONE_SWITCHES.iter().zip(switch_pos) {
            registry.insert(PlannedNode::new(
                *name,
                NodeKind::Switch,
                &spec.backbone.switch_template,
                pos,
            ))?;
        }
        let backbone_links: Vec<(String, u32, String, u32)> = vec![
            ("rNorth".into(), 1, "rWest".into(), 1),
            ("rNorth".into(), 2, "rEast".into(), 1),
            ("rWest".into(), 2, "rEast".into(), 2),
            ("rNorth".into(), 0, "sNorth".into(), 0),
            ("rWest".into(), 0, "sWest".into(), 0),
            ("rEast".into(), 0, "sEast".into(), 0),
        ];
        for name in BACKBONE_ROUTERS {
            registry.reserve_initial(name, 3)?;
        }
        for name in BACKBONE_SWITCHES {
            registry.reserve_initial(name, 1)?;
        }

        let mut extra_hosts = ExtraHosts::new();
        for host in &config.sim.static_hosts {
            extra_hosts.insert(&host.name, host.addr);
        }

        for node in &spec.nodes {
            let parent_port = registry.next_port(&node.parent)?;
            let position = (node.x * g, node.y * g);
            match node.kind {
                NodeKind::Cluster => {
                    Self::plan_cluster(
                        &mut registry,
                        &mut clusters,
                        node,
                        &spec.backbone.switch_template,
                        parent_port,
                        position,
                        config,
                    )?;
                }
                _ => {
                    Self::plan_single(&mut registry, &clusters, node, parent_port, position, config)?;
                }
            }
        }

        let conflicts = check_no_collisions(registry.ifaces());
        if !conflicts.is_empty() {
            return Err(LabError::AddressCollision(conflicts));
        }

        Ok(Self {
            registry,
            clusters,
            backbone_links,
            extra_hosts,
        })
    }

    /// Plan a router, switch, host or cloud entry: one node, one uplink, and for device-backed
    /// kinds the interface assignment and environment updates.
    fn plan_single(
        registry: &mut NodeRegistry,
        clusters: &HashMap<String, ClusterRecord>,
        node: &NodeDescriptor,
        parent_port: u32,
        position: (i32, i32),
        config: &LabConfig,
    ) -> Result<(), LabError> {
        let mut planned = PlannedNode::new(&node.name, node.kind, &node.template, position);
        planned.role = node.role;
        planned.link = Some(PlannedLink {
            parent: node.parent.clone(),
            parent_port,
            local_port: 0,
        });
        planned.next_port = 1;

        if let Some(block) = node.ip {
            // The resolver node answers its own queries.
            let nameserver = if node.name == "dns" {
                Ipv4Addr::LOCALHOST
            } else {
                config.sim.lab_dns_addr
            };
            planned.iface = Some(IfaceConfig { block, nameserver });
        }

        if node.kind == NodeKind::Cloud {
            // Reconstruct the member list of the paired cluster from its record.
            let cluster_name = node.cluster.as_deref().unwrap_or_default();
            let record = clusters.get(cluster_name).ok_or_else(|| {
                LabError::Configuration(format!(
                    "cloud {} pairs with unknown cluster {cluster_name}",
                    node.name
                ))
            })?;
            planned
                .env
                .insert(EnvKey::CoapAddrList, range_string(record.base, record.count)?);
            if record.tls {
                planned.env.insert(EnvKey::Psk, "True".into());
            }
        }

        registry.insert(planned)
    }

    /// Plan a cluster entry: a fresh local switch on the parent, then `count` devices stacked
    /// below it, each linked to the local switch at port `i` and addressed at `base + i`.
    #[allow(clippy::too_many_arguments)]
    fn plan_cluster(
        registry: &mut NodeRegistry,
        clusters: &mut HashMap<String, ClusterRecord>,
        node: &NodeDescriptor,
        switch_template: &str,
        parent_port: u32,
        position: (i32, i32),
        config: &LabConfig,
    ) -> Result<(), LabError> {
        let block = node.ip.expect("validated");
        let count = node.count.expect("validated");

        // Address derivation happens before any node is planned for this entry, so an oversized
        // cluster fails without leaving partial members behind.
        let addrs = derive_cluster_addresses(block.iface, count)?;

        // Devices occupy local ports 0..count, so the uplink takes port `count`.
        let switch_name = format!("{}-sw", node.name);
        let h_offset = (config.layout.cluster_horizontal_spacing * config.project.grid_unit as f64)
            as i32;
        let mut switch = PlannedNode::new(
            &switch_name,
            NodeKind::Switch,
            switch_template,
            (position.0 + h_offset, position.1),
        );
        switch.link = Some(PlannedLink {
            parent: node.parent.clone(),
            parent_port,
            local_port: count as u32,
        });
        registry.insert(switch)?;

        let mut env = BTreeMap::new();
        if let Some(broker) = &node.broker {
            env.insert(EnvKey::MqttBrokerAddr, broker.clone());
            // TLS and MQTT_AUTH stay present even when blank; images probe for key presence.
            env.insert(EnvKey::Tls, if node.tls { "True".into() } else { String::new() });
            env.insert(EnvKey::MqttAuth, node.auth.clone().unwrap_or_default());
            if let Some(ntp) = &config.sim.ntp_server {
                env.insert(EnvKey::NtpServer, ntp.clone());
            }
        }

        for (i, addr) in addrs.iter().enumerate() {
            let device_name = format!("{}-{}", node.name, i + 1);
            let device_port = registry.next_port(&switch_name)?;
            let mut device = PlannedNode::new(
                &device_name,
                NodeKind::Host,
                &node.template,
                (
                    position.0,
                    position.1 + i as i32 * config.layout.cluster_vertical_spacing,
                ),
            );
            device.role = node.role;
            device.link = Some(PlannedLink {
                parent: switch_name.clone(),
                parent_port: device_port,
                local_port: 0,
            });
            device.next_port = 1;
            device.iface = Some(IfaceConfig {
                block: AddressBlock {
                    // prefix length was already valid on the base block
                    iface: Ipv4Net::new(*addr, block.iface.prefix_len()).unwrap(),
                    gateway: block.gateway,
                },
                nameserver: config.sim.lab_dns_addr,
            });
            device.env = env.clone();
            registry.insert(device)?;
        }

        // The uplink port was committed ahead of the device ports; account for it.
        registry.reserve_initial(&switch_name, count as u32 + 1)?;

        clusters.insert(
            node.name.clone(),
            ClusterRecord {
                base: block.iface,
                count,
                tls: node.tls,
            },
        );
        Ok(())
    }

    /// Re-run the whole-topology address check. Empty means consistent.
    pub fn validate_addresses(&self) -> Vec<AddressConflict> {
        check_no_collisions(self.registry.ifaces())
    }
}
