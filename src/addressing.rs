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

//! IPv4 address derivation for device clusters, and whole-topology collision checking.
//!
//! A cluster of `count` homogeneous devices is addressed from a single base interface address by
//! incrementing the last octet: the first device gets the base address, the last one gets
//! `base + count - 1`. The derived range must stay within the last octet; crossing the octet
//! boundary is rejected rather than carried into the third octet.

use std::{collections::BTreeMap, fmt, net::Ipv4Addr};

use ipnet::Ipv4Net;
use serde::Deserialize;

use crate::LabError;

/// A static interface assignment: the interface address (with prefix length) and its gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AddressBlock {
    /// Interface address in CIDR form, e.g. `192.168.17.5/24`.
    #[serde(rename = "ip")]
    pub iface: Ipv4Net,
    /// Default gateway for the interface.
    #[serde(rename = "gw")]
    pub gateway: Ipv4Addr,
}

/// Derive the addresses of all `count` members of a cluster, starting at the base address and
/// incrementing the last octet. Fails with [`LabError::AddressRange`] if the range would overflow
/// the last octet, and with [`LabError::Configuration`] for an empty cluster.
pub fn derive_cluster_addresses(base: Ipv4Net, count: u8) -> Result<Vec<Ipv4Addr>, LabError> {
    if count == 0 {
        return Err(LabError::Configuration(format!(
            "cluster at {base} has zero members"
        )));
    }
    let octets = base.addr().octets();
    let last = octets[3] as u16 + count as u16 - 1;
    if last > 255 {
        return Err(LabError::AddressRange { base, count });
    }
    Ok((0..count)
        .map(|i| Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3] + i))
        .collect())
}

/// Render the member list of a cluster as `"a.b.c.first-a.b.c.last"`. This is the format that
/// cloud aggregation images expect for enumerating their cluster peers.
pub fn range_string(base: Ipv4Net, count: u8) -> Result<String, LabError> {
    let addrs = derive_cluster_addresses(base, count)?;
    // `derive_cluster_addresses` guarantees at least one member.
    Ok(format!(
        "{}-{}",
        addrs.first().unwrap(),
        addrs.last().unwrap()
    ))
}

/// Two or more nodes sharing the same interface address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressConflict {
    /// The address assigned more than once.
    pub addr: Ipv4Addr,
    /// The names of all nodes carrying that address, in assignment order.
    pub nodes: Vec<String>,
}

impl fmt::Display for AddressConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} assigned to {}", self.addr, self.nodes.join(", "))
    }
}

/// Scan every assigned interface of the topology and report all duplicate addresses. An empty
/// result means the addressing plan is consistent; a non-empty result is a fatal configuration
/// error for the operator, never auto-healed.
pub fn check_no_collisions<'a>(
    ifaces: impl IntoIterator<Item = (&'a str, Ipv4Addr)>,
) -> Vec<AddressConflict> {
    let mut by_addr: BTreeMap<Ipv4Addr, Vec<String>> = BTreeMap::new();
    for (name, addr) in ifaces {
        by_addr.entry(addr).or_default().push(name.to_string());
    }
    by_addr
        .into_iter()
        .filter(|(_, nodes)| nodes.len() > 1)
        .map(|(addr, nodes)| AddressConflict { addr, nodes })
        .collect()
}
