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

use std::path::PathBuf;

use clap::Parser;

use gns3_lab::{config::LabConfig, gns3::Gns3Client, topology::TopologySpec, IotLab};

/// Plan a topology and materialize it into a fresh project on the emulation platform.
#[derive(Debug, Parser)]
struct Cli {
    /// Path to the lab configuration file.
    #[clap(long, short = 'c', default_value = "config.toml")]
    config: PathBuf,
    /// Path to the topology specification.
    #[clap(long, short = 't', default_value = "topology.toml")]
    topology: PathBuf,
    /// Plan and validate only; do not touch the platform.
    #[clap(long, short = 'n')]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_timed();

    let args = Cli::parse();
    let config = LabConfig::from_file(&args.config)?;
    let spec = TopologySpec::from_file(&args.topology)?;

    let lab = IotLab::new(&spec, &config)?;
    println!(
        "planned {} nodes in {} clusters",
        lab.plan().registry.len(),
        lab.plan().clusters.len()
    );
    if args.dry_run {
        return Ok(());
    }

    let lab = lab.connect(Gns3Client::new(&config.server)).await?;
    println!(
        "project {} holds the materialized topology",
        config.project.name
    );
    lab.disconnect();
    Ok(())
}
