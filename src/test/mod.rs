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

mod addressing;
mod mock;
mod plan;
mod topology;

pub(crate) use mock::MockEmulator;

use crate::{config::LabConfig, topology::TopologySpec};

/// The lab configuration used throughout the unit tests.
pub(crate) fn test_config() -> LabConfig {
    LabConfig::from_file(concat!(env!("OUT_DIR"), "/.config/config.toml")).unwrap()
}

/// A small but complete MQTT scenario with one zone, a cluster and a cloud endpoint.
pub(crate) fn test_spec() -> TopologySpec {
    TopologySpec::from_file(concat!(env!("OUT_DIR"), "/.config/topology.toml")).unwrap()
}
