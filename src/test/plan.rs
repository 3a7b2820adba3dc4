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

use std::net::Ipv4Addr;

use pretty_assertions::assert_eq;

use super::{test_config, test_spec};
use crate::{
    env::EnvKey,
    plan::{NodeState, TopologyPlan},
    topology::NodeKind,
    LabError,
};

fn plan() -> TopologyPlan {
    TopologyPlan::build(&test_spec(), &test_config()).unwrap()
}

#[test]
fn backbone_always_present() {
    let plan = plan();
    for name in ["rNorth", "rWest", "rEast", "sNorth", "sWest", "sEast"] {
        assert!(plan.registry.contains(name), "missing {name}");
    }
    assert_eq!(plan.backbone_links.len(), 6);
    // every node of the fixture: 6 backbone, zone router and switch, three hosts,
    // cluster switch plus five members, cloud endpoint
    assert_eq!(plan.registry.len(), 18);
}

#[test]
fn cluster_expansion() {
    let plan = plan();
    let switch = plan.registry.get("city-power-sw").unwrap();
    assert_eq!(switch.kind, NodeKind::Switch);
    let uplink = switch.link.as_ref().unwrap();
    assert_eq!(uplink.parent, "sIndustrial");
    // the uplink sits above the five member ports
    assert_eq!(uplink.local_port, 5);

    for i in 0..5u8 {
        let device = plan.registry.get(&format!("city-power-{}", i + 1)).unwrap();
        let link = device.link.as_ref().unwrap();
        assert_eq!(link.parent, "city-power-sw");
        assert_eq!(link.parent_port, i as u32);
        assert_eq!(link.local_port, 0);
        let iface = device.iface.unwrap();
        assert_eq!(
            iface.block.iface.addr(),
            Ipv4Addr::new(192, 168, 17, 10 + i)
        );
        assert_eq!(iface.block.iface.prefix_len(), 24);
        assert_eq!(iface.block.gateway, Ipv4Addr::new(192, 168, 17, 1));
    }

    let record = plan.clusters.get("city-power").unwrap();
    assert_eq!(record.count, 5);
    assert!(record.tls);
}

#[test]
fn parent_ports_are_allocated_in_declaration_order() {
    let plan = plan();
    // sNorth: port 0 is the router uplink, then dns, ntp, cloud in order
    assert_eq!(plan.registry.get("dns").unwrap().link.as_ref().unwrap().parent_port, 1);
    assert_eq!(plan.registry.get("ntp").unwrap().link.as_ref().unwrap().parent_port, 2);
    assert_eq!(
        plan.registry
            .get("city-power-cloud")
            .unwrap()
            .link
            .as_ref()
            .unwrap()
            .parent_port,
        3
    );
    // sIndustrial: port 0 is its own uplink to rIndustrial, then broker, then the cluster switch
    assert_eq!(
        plan.registry
            .get("broker-urbano")
            .unwrap()
            .link
            .as_ref()
            .unwrap()
            .parent_port,
        1
    );
    assert_eq!(
        plan.registry
            .get("city-power-sw")
            .unwrap()
            .link
            .as_ref()
            .unwrap()
            .parent_port,
        2
    );
}

#[test]
fn next_port_is_strictly_increasing() {
    let mut plan = plan();
    let a = plan.registry.next_port("sNorth").unwrap();
    let b = plan.registry.next_port("sNorth").unwrap();
    let c = plan.registry.next_port("sNorth").unwrap();
    assert!(a < b && b < c);
}

#[test]
fn device_environment_updates() {
    let plan = plan();
    let device = plan.registry.get("city-power-3").unwrap();
    assert_eq!(
        device.env.get(&EnvKey::MqttBrokerAddr).map(String::as_str),
        Some("broker.urbano.lab.local")
    );
    assert_eq!(device.env.get(&EnvKey::Tls).map(String::as_str), Some("True"));
    assert_eq!(
        device.env.get(&EnvKey::MqttAuth).map(String::as_str),
        Some("city:power")
    );
    assert_eq!(
        device.env.get(&EnvKey::NtpServer).map(String::as_str),
        Some("ntp.lab.local")
    );
    // plain hosts get no environment updates
    assert!(plan.registry.get("broker-urbano").unwrap().env.is_empty());
}

#[test]
fn cloud_aggregates_the_paired_cluster() {
    let plan = plan();
    let cloud = plan.registry.get("city-power-cloud").unwrap();
    assert_eq!(
        cloud.env.get(&EnvKey::CoapAddrList).map(String::as_str),
        Some("192.168.17.10-192.168.17.14")
    );
    // the cluster talks TLS, so the endpoint authenticates with a PSK
    assert_eq!(cloud.env.get(&EnvKey::Psk).map(String::as_str), Some("True"));
}

#[test]
fn nameserver_points_to_the_lab_resolver() {
    let plan = plan();
    let dns = plan.registry.get("dns").unwrap().iface.unwrap();
    assert_eq!(dns.nameserver, Ipv4Addr::LOCALHOST);
    let ntp = plan.registry.get("ntp").unwrap().iface.unwrap();
    assert_eq!(ntp.nameserver, Ipv4Addr::new(192, 168, 0, 5));
}

#[test]
fn static_hosts_become_extra_hosts() {
    let plan = plan();
    assert_eq!(
        plan.extra_hosts.encode(),
        "broker.urbano.lab.local:192.168.17.2\nntp.lab.local:192.168.0.6"
    );
}

#[test]
fn positions_are_scaled_by_the_grid_unit() {
    let plan = plan();
    // fixture: dns at (2, -8), grid unit 15
    assert_eq!(plan.registry.get("dns").unwrap().position, (30, -120));
}

#[test]
fn address_collision_is_fatal() {
    let mut spec = test_spec();
    let mut dup = spec.get("ntp").unwrap().clone();
    dup.name = "ntp2".to_string();
    spec.nodes.push(dup);
    let err = TopologyPlan::build(&spec, &test_config()).unwrap_err();
    match err {
        LabError::AddressCollision(conflicts) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].nodes, vec!["ntp", "ntp2"]);
        }
        other => panic!("expected an address collision, got {other:?}"),
    }
}

#[test]
fn oversized_cluster_fails_the_whole_plan() {
    let mut spec = test_spec();
    for node in &mut spec.nodes {
        if node.name == "city-power" {
            node.ip = Some(crate::addressing::AddressBlock {
                iface: "192.168.17.252/24".parse().unwrap(),
                gateway: Ipv4Addr::new(192, 168, 17, 1),
            });
        }
    }
    let err = TopologyPlan::build(&spec, &test_config()).unwrap_err();
    assert!(matches!(err, LabError::AddressRange { count: 5, .. }));
}

#[test]
fn lifecycle_rejects_out_of_order_operations() {
    let mut plan = plan();

    // configuring before the node exists
    let err = plan.registry.get_mut("dns").unwrap().mark_configured().unwrap_err();
    assert!(matches!(
        err,
        LabError::InvalidNodeState {
            state: NodeState::Planned,
            action: "configure",
            ..
        }
    ));

    // creating twice
    let node = plan.registry.get_mut("dns").unwrap();
    node.mark_created("n1".to_string()).unwrap();
    let err = node.mark_created("n2".to_string()).unwrap_err();
    assert!(matches!(err, LabError::InvalidNodeState { action: "create", .. }));

    // the happy path: create, link (repeatedly), configure, start
    let node = plan.registry.get_mut("ntp").unwrap();
    node.mark_created("n3".to_string()).unwrap();
    node.mark_linked().unwrap();
    node.mark_linked().unwrap();
    node.mark_configured().unwrap();
    node.mark_started().unwrap();
    assert_eq!(node.state, NodeState::Started);

    // starting twice
    let err = plan.registry.get_mut("ntp").unwrap().mark_started().unwrap_err();
    assert!(matches!(err, LabError::InvalidNodeState { action: "start", .. }));
}

#[test]
fn id_requires_a_created_node() {
    let plan = plan();
    assert!(plan.registry.get("dns").unwrap().id().is_err());
}
