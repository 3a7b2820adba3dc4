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

//! A recording, in-memory implementation of the platform contract.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::gns3::{Emulator, Gns3Error, NodeHandle, Project, Template};

/// Everything the mock platform remembers about one run.
#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// The single project the mock can hold.
    pub project: Option<Project>,
    /// Nodes in the project, in creation order.
    pub nodes: Vec<NodeHandle>,
    /// Registered templates.
    pub templates: Vec<Template>,
    /// `(template_id, name, x, y)` per `create_node` call, in call order.
    pub created: Vec<(String, String, i32, i32)>,
    /// `(node_id, port, node_id, port)` per `create_link` call, in call order.
    pub links: Vec<(String, u32, String, u32)>,
    /// Current environment string per node id.
    pub environments: HashMap<String, String>,
    /// Current extra-hosts string per node id.
    pub extra_hosts: HashMap<String, String>,
    /// `(node_id, path, content)` per `write_node_file` call.
    pub files: Vec<(String, String, String)>,
    /// Node ids in start order.
    pub started: Vec<String>,
    /// Node ids whose console endpoint was queried.
    pub console_queries: Vec<String>,
    /// Whether the compute probe reports the runtime as down.
    pub compute_down: bool,
    next_id: usize,
}

/// A platform stand-in that records every call and never leaves the process.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockEmulator {
    state: Arc<Mutex<MockState>>,
}

impl MockEmulator {
    /// An empty platform with the given templates registered (id `tpl-<name>`).
    pub fn with_templates<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mock = Self::default();
        {
            let mut state = mock.lock();
            state.templates = names
                .into_iter()
                .map(|name| Template {
                    id: format!("tpl-{name}"),
                    name: name.to_string(),
                })
                .collect();
        }
        mock
    }

    /// Pre-populate the (opened) project with a node, as a leftover of an earlier run.
    pub fn seed_node(&self, name: &str) {
        let mut state = self.lock();
        state.project = Some(Project {
            id: "p1".to_string(),
            name: "seeded".to_string(),
            status: "opened".to_string(),
        });
        let id = format!("n{}", state.next_id);
        state.next_id += 1;
        state.nodes.push(NodeHandle {
            id,
            name: name.to_string(),
        });
    }

    /// Make the compute probe fail from now on.
    pub fn take_compute_down(&self) {
        self.lock().compute_down = true;
    }

    /// Inspect the recorded state.
    pub fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Emulator for MockEmulator {
    async fn version(&self) -> Result<String, Gns3Error> {
        Ok("2.2.35".to_string())
    }

    async fn check_compute(&self) -> Result<(), Gns3Error> {
        if self.lock().compute_down {
            Err(Gns3Error::Unreachable("no connected compute".to_string()))
        } else {
            Ok(())
        }
    }

    async fn project_by_name(&self, name: &str) -> Result<Option<Project>, Gns3Error> {
        let state = self.lock();
        Ok(state.project.clone().map(|mut p| {
            p.name = name.to_string();
            p
        }))
    }

    async fn create_project(
        &self,
        name: &str,
        _scene_width: u32,
        _scene_height: u32,
        _grid_unit: u32,
    ) -> Result<Project, Gns3Error> {
        let project = Project {
            id: "p1".to_string(),
            name: name.to_string(),
            status: "opened".to_string(),
        };
        self.lock().project = Some(project.clone());
        Ok(project)
    }

    async fn open_project(&self, _project: &Project) -> Result<(), Gns3Error> {
        Ok(())
    }

    async fn list_nodes(&self, _project: &Project) -> Result<Vec<NodeHandle>, Gns3Error> {
        Ok(self.lock().nodes.clone())
    }

    async fn list_templates(&self) -> Result<Vec<Template>, Gns3Error> {
        Ok(self.lock().templates.clone())
    }

    async fn create_node(
        &self,
        _project: &Project,
        template_id: &str,
        name: &str,
        x: i32,
        y: i32,
    ) -> Result<NodeHandle, Gns3Error> {
        let mut state = self.lock();
        let id = format!("n{}", state.next_id);
        state.next_id += 1;
        state
            .created
            .push((template_id.to_string(), name.to_string(), x, y));
        let handle = NodeHandle {
            id,
            name: name.to_string(),
        };
        state.nodes.push(handle.clone());
        Ok(handle)
    }

    async fn create_link(
        &self,
        _project: &Project,
        node_a: &str,
        port_a: u32,
        node_b: &str,
        port_b: u32,
    ) -> Result<(), Gns3Error> {
        let mut state = self.lock();
        let occupied = state.links.iter().any(|(a, pa, b, pb)| {
            (a == node_a && *pa == port_a)
                || (b == node_a && *pb == port_a)
                || (a == node_b && *pa == port_b)
                || (b == node_b && *pb == port_b)
        });
        if occupied {
            return Err(Gns3Error::PortInUse {
                node: node_a.to_string(),
                port: port_a,
            });
        }
        state.links.push((
            node_a.to_string(),
            port_a,
            node_b.to_string(),
            port_b,
        ));
        Ok(())
    }

    async fn node_environment(
        &self,
        _project: &Project,
        node_id: &str,
    ) -> Result<String, Gns3Error> {
        Ok(self
            .lock()
            .environments
            .get(node_id)
            .cloned()
            .unwrap_or_else(|| "IMAGE_BUILTIN=1".to_string()))
    }

    async fn set_node_environment(
        &self,
        _project: &Project,
        node_id: &str,
        environment: &str,
    ) -> Result<(), Gns3Error> {
        self.lock()
            .environments
            .insert(node_id.to_string(), environment.to_string());
        Ok(())
    }

    async fn set_node_extra_hosts(
        &self,
        _project: &Project,
        node_id: &str,
        extra_hosts: &str,
    ) -> Result<(), Gns3Error> {
        self.lock()
            .extra_hosts
            .insert(node_id.to_string(), extra_hosts.to_string());
        Ok(())
    }

    async fn write_node_file(
        &self,
        _project: &Project,
        node_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), Gns3Error> {
        self.lock()
            .files
            .push((node_id.to_string(), path.to_string(), content.to_string()));
        Ok(())
    }

    async fn console_endpoint(
        &self,
        _project: &Project,
        node_id: &str,
    ) -> Result<(String, u16), Gns3Error> {
        self.lock().console_queries.push(node_id.to_string());
        Ok(("127.0.0.1".to_string(), 5000))
    }

    async fn start_node(&self, _project: &Project, node_id: &str) -> Result<(), Gns3Error> {
        self.lock().started.push(node_id.to_string());
        Ok(())
    }
}
