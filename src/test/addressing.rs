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

use ipnet::Ipv4Net;
use pretty_assertions::assert_eq;

use crate::{
    addressing::{check_no_collisions, derive_cluster_addresses, range_string},
    LabError,
};

fn net(s: &str) -> Ipv4Net {
    s.parse().unwrap()
}

#[test]
fn derive_sequential_last_octet() {
    let addrs = derive_cluster_addresses(net("192.168.17.10/24"), 3).unwrap();
    assert_eq!(
        addrs,
        vec![
            Ipv4Addr::new(192, 168, 17, 10),
            Ipv4Addr::new(192, 168, 17, 11),
            Ipv4Addr::new(192, 168, 17, 12),
        ]
    );
}

#[test]
fn derive_single_member() {
    let addrs = derive_cluster_addresses(net("10.0.0.1/24"), 1).unwrap();
    assert_eq!(addrs, vec![Ipv4Addr::new(10, 0, 0, 1)]);
}

#[test]
fn derive_up_to_the_boundary() {
    let addrs = derive_cluster_addresses(net("10.0.0.250/24"), 6).unwrap();
    assert_eq!(addrs.last(), Some(&Ipv4Addr::new(10, 0, 0, 255)));
}

#[test]
fn derive_rejects_octet_overflow() {
    let err = derive_cluster_addresses(net("10.0.0.250/24"), 7).unwrap_err();
    assert!(matches!(err, LabError::AddressRange { count: 7, .. }));
}

#[test]
fn derive_rejects_empty_cluster() {
    let err = derive_cluster_addresses(net("10.0.0.1/24"), 0).unwrap_err();
    assert!(matches!(err, LabError::Configuration(_)));
}

#[test]
fn range_string_spans_first_to_last() {
    assert_eq!(
        range_string(net("192.168.17.10/24"), 3).unwrap(),
        "192.168.17.10-192.168.17.12"
    );
    assert_eq!(
        range_string(net("192.168.17.10/24"), 1).unwrap(),
        "192.168.17.10-192.168.17.10"
    );
}

#[test]
fn collisions_found_and_grouped() {
    let a = Ipv4Addr::new(10, 0, 0, 1);
    let b = Ipv4Addr::new(10, 0, 0, 2);
    let conflicts = check_no_collisions([("n1", a), ("n2", b), ("n3", a), ("n4", a)]);
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].addr, a);
    assert_eq!(conflicts[0].nodes, vec!["n1", "n3", "n4"]);
}

#[test]
fn no_collisions_is_empty() {
    let conflicts = check_no_collisions([
        ("n1", Ipv4Addr::new(10, 0, 0, 1)),
        ("n2", Ipv4Addr::new(10, 0, 0, 2)),
    ]);
    assert!(conflicts.is_empty());
}
