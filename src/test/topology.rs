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

use pretty_assertions::assert_eq;

use super::test_spec;
use crate::{
    topology::{NodeKind, Role, TopologySpec},
    LabError,
};

fn assert_rejected(raw: &str, needle: &str) {
    match TopologySpec::from_str(raw) {
        Err(LabError::Configuration(msg)) => {
            assert!(msg.contains(needle), "unexpected message: {msg}")
        }
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

const HEADER: &str = r#"
[backbone]
router_template = "VyOS 1.3.0"
switch_template = "Ethernet switch"
"#;

#[test]
fn fixture_parses() {
    let spec = test_spec();
    assert_eq!(spec.nodes.len(), 7);
    let cluster = spec.get("city-power").unwrap();
    assert_eq!(cluster.kind, NodeKind::Cluster);
    assert_eq!(cluster.count, Some(5));
    assert_eq!(cluster.role, Some(Role::Leaf));
    assert!(cluster.tls);
    let (iface, gw) = cluster.address().unwrap();
    assert_eq!(iface.to_string(), "192.168.17.10/24");
    assert_eq!(gw.to_string(), "192.168.17.1");
}

#[test]
fn backbone_names_are_reserved() {
    let raw = format!(
        r#"{HEADER}
[[node]]
kind = "switch"
name = "sNorth"
x = 0
y = 0
parent = "rNorth"
template = "Ethernet switch"
"#
    );
    assert_rejected(&raw, "duplicate node name: sNorth");
}

#[test]
fn parent_must_be_declared_before_child() {
    let raw = format!(
        r#"{HEADER}
[[node]]
kind = "switch"
name = "sZone"
x = 0
y = 0
parent = "rZone"
template = "Ethernet switch"

[[node]]
kind = "router"
name = "rZone"
x = 0
y = 2
parent = "sWest"
template = "VyOS 1.3.0"
"#
    );
    assert_rejected(&raw, "not declared before it");
}

#[test]
fn malformed_name_rejected() {
    let raw = format!(
        r#"{HEADER}
[[node]]
kind = "switch"
name = "1bad name"
x = 0
y = 0
parent = "sNorth"
template = "Ethernet switch"
"#
    );
    assert_rejected(&raw, "invalid node name");
}

#[test]
fn host_needs_address_and_role() {
    let raw = format!(
        r#"{HEADER}
[[node]]
kind = "host"
name = "dns"
x = 0
y = 0
parent = "sNorth"
template = "lab-dns"
role = "core-service"
"#
    );
    assert_rejected(&raw, "missing its ip/gw");
}

#[test]
fn cluster_needs_a_size() {
    let raw = format!(
        r#"{HEADER}
[[node]]
kind = "cluster"
name = "plant"
x = 0
y = 0
parent = "sWest"
template = "mqtt-device"
ip = "10.0.0.10/24"
gw = "10.0.0.1"
role = "leaf"
"#
    );
    assert_rejected(&raw, "missing its size");
}

#[test]
fn cloud_must_pair_with_declared_cluster() {
    let raw = format!(
        r#"{HEADER}
[[node]]
kind = "cloud"
name = "plant-cloud"
x = 0
y = 0
parent = "sNorth"
template = "coap-cloud"
ip = "10.0.0.30/24"
gw = "10.0.0.1"
role = "server"
cluster = "plant"
"#
    );
    assert_rejected(&raw, "not a previously declared cluster");
}

#[test]
fn cluster_fields_rejected_on_hosts() {
    let raw = format!(
        r#"{HEADER}
[[node]]
kind = "host"
name = "dns"
x = 0
y = 0
parent = "sNorth"
template = "lab-dns"
ip = "10.0.0.5/24"
gw = "10.0.0.1"
role = "core-service"
count = 3
"#
    );
    assert_rejected(&raw, "cluster-only fields");
}

#[test]
fn routers_carry_no_address() {
    let raw = format!(
        r#"{HEADER}
[[node]]
kind = "router"
name = "rZone"
x = 0
y = 0
parent = "sWest"
template = "VyOS 1.3.0"
ip = "10.0.0.1/24"
gw = "10.0.0.254"
"#
    );
    assert_rejected(&raw, "no ip or role");
}
