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

//! The control-API client of the emulation platform.
//!
//! The platform is an opaque collaborator with a narrow contract, captured by the [`Emulator`]
//! trait: create and open projects, instantiate nodes from templates, wire links between
//! node/port pairs, read and write the environment of container nodes, and start nodes.
//! [`Gns3Client`] implements the trait over the platform's HTTP API; tests substitute a
//! recording mock.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::ServerConfig;

/// A project on the platform, holding one materialized topology.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    /// Platform id of the project.
    #[serde(rename = "project_id")]
    pub id: String,
    /// Human-readable project name.
    pub name: String,
    /// `opened` or `closed`.
    pub status: String,
}

/// A node template registered on the platform (image/blueprint).
#[derive(Debug, Clone, Deserialize)]
pub struct Template {
    /// Platform id of the template.
    #[serde(rename = "template_id")]
    pub id: String,
    /// Template name, the handle used in topology specifications.
    pub name: String,
}

/// A materialized node on the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeHandle {
    /// Platform id of the node.
    #[serde(rename = "node_id")]
    pub id: String,
    /// Node name as shown in the project.
    pub name: String,
}

/// Error kind returned by the platform client.
#[derive(Debug, Error)]
pub enum Gns3Error {
    /// The control API cannot be reached at all.
    #[error("Emulation platform unreachable: {0}")]
    Unreachable(String),
    /// Transport-level error while talking to the control API.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The platform rejected a request.
    #[error("Platform rejected {context}: {status}: {message}")]
    Api {
        /// What the request was trying to do.
        context: String,
        /// HTTP status returned.
        status: StatusCode,
        /// Error message from the platform, if any.
        message: String,
    },
    /// A node id was not found on the platform.
    #[error("Node not found on the platform: {0}")]
    NodeNotFound(String),
    /// A link endpoint names a port that is already wired.
    #[error("Port {port} on node {node} is already in use")]
    PortInUse {
        /// The node owning the port.
        node: String,
        /// The conflicting port number.
        port: u32,
    },
    /// The platform version is not supported.
    #[error("Unsupported platform version: {0}")]
    BadVersion(String),
}

/// The narrow contract this crate needs from the emulation platform.
#[async_trait]
pub trait Emulator {
    /// Platform version string, also serving as the reachability probe.
    async fn version(&self) -> Result<String, Gns3Error>;

    /// Probe the container runtime backing the platform. Invoked once before startup.
    async fn check_compute(&self) -> Result<(), Gns3Error>;

    /// Find a project by name.
    async fn project_by_name(&self, name: &str) -> Result<Option<Project>, Gns3Error>;

    /// Create a fresh project with the given scene dimensions and grid unit.
    async fn create_project(
        &self,
        name: &str,
        scene_width: u32,
        scene_height: u32,
        grid_unit: u32,
    ) -> Result<Project, Gns3Error>;

    /// Open a project if it is closed.
    async fn open_project(&self, project: &Project) -> Result<(), Gns3Error>;

    /// All nodes currently in the project.
    async fn list_nodes(&self, project: &Project) -> Result<Vec<NodeHandle>, Gns3Error>;

    /// All templates registered on the platform.
    async fn list_templates(&self) -> Result<Vec<Template>, Gns3Error>;

    /// Instantiate a template at the given scene position and give the node a name.
    async fn create_node(
        &self,
        project: &Project,
        template_id: &str,
        name: &str,
        x: i32,
        y: i32,
    ) -> Result<NodeHandle, Gns3Error>;

    /// Wire two node/port pairs together.
    async fn create_link(
        &self,
        project: &Project,
        node_a: &str,
        port_a: u32,
        node_b: &str,
        port_b: u32,
    ) -> Result<(), Gns3Error>;

    /// The raw `KEY=value` environment string of a container node.
    async fn node_environment(&self, project: &Project, node_id: &str)
        -> Result<String, Gns3Error>;

    /// Overwrite the environment string of a container node.
    async fn set_node_environment(
        &self,
        project: &Project,
        node_id: &str,
        environment: &str,
    ) -> Result<(), Gns3Error>;

    /// Overwrite the extra-hosts records of a container node.
    async fn set_node_extra_hosts(
        &self,
        project: &Project,
        node_id: &str,
        extra_hosts: &str,
    ) -> Result<(), Gns3Error>;

    /// Write a file into a node's filesystem overlay (e.g. `etc/network/interfaces`).
    async fn write_node_file(
        &self,
        project: &Project,
        node_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), Gns3Error>;

    /// Host and TCP port of the node's console.
    async fn console_endpoint(
        &self,
        project: &Project,
        node_id: &str,
    ) -> Result<(String, u16), Gns3Error>;

    /// Start a node.
    async fn start_node(&self, project: &Project, node_id: &str) -> Result<(), Gns3Error>;
}

/// HTTP client for the platform's v2 control API.
#[derive(Debug, Clone)]
pub struct Gns3Client {
    http: reqwest::Client,
    base: String,
    user: String,
    password: String,
}

impl Gns3Client {
    /// Create a client for the configured server. No connection is made yet; call
    /// [`Emulator::version`] to probe reachability.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: config.base_url(),
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base))
            .basic_auth(&self.user, Some(&self.password))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base))
            .basic_auth(&self.user, Some(&self.password))
    }

    fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .put(format!("{}{path}", self.base))
            .basic_auth(&self.user, Some(&self.password))
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        context: impl Into<String>,
    ) -> Result<reqwest::Response, Gns3Error> {
        let context = context.into();
        let resp = req
            .send()
            .await
            .map_err(|e| Gns3Error::Unreachable(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let message = resp.text().await.unwrap_or_default();
            log::error!("[gns3] {context} failed: {status}: {message}");
            Err(classify_api_error(context, status, message))
        }
    }

    /// Fetch the raw JSON document of a node.
    async fn node_json(
        &self,
        project: &Project,
        node_id: &str,
    ) -> Result<serde_json::Value, Gns3Error> {
        let path = format!("/projects/{}/nodes/{node_id}", project.id);
        let resp = self.send(self.get(&path), format!("get node {node_id}")).await?;
        Ok(resp.json().await?)
    }

    fn node_property(value: &serde_json::Value, key: &str) -> String {
        value
            .get("properties")
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

fn classify_api_error(context: String, status: StatusCode, message: String) -> Gns3Error {
    if status == StatusCode::NOT_FOUND && message.to_lowercase().contains("node") {
        Gns3Error::NodeNotFound(message)
    } else {
        Gns3Error::Api {
            context,
            status,
            message,
        }
    }
}

#[async_trait]
impl Emulator for Gns3Client {
    async fn version(&self) -> Result<String, Gns3Error> {
        #[derive(Deserialize)]
        struct Version {
            version: String,
        }
        let resp = self.send(self.get("/version"), "get version").await?;
        let v: Version = resp.json().await?;
        log::debug!("[gns3] server version {}", v.version);
        if v.version.starts_with('2') {
            Ok(v.version)
        } else {
            Err(Gns3Error::BadVersion(v.version))
        }
    }

    async fn check_compute(&self) -> Result<(), Gns3Error> {
        #[derive(Deserialize)]
        struct Compute {
            connected: bool,
            name: String,
        }
        let resp = self.send(self.get("/computes"), "list computes").await?;
        let computes: Vec<Compute> = resp.json().await?;
        if computes.iter().any(|c| c.connected) {
            Ok(())
        } else {
            let names = computes.into_iter().map(|c| c.name).collect::<Vec<_>>();
            Err(Gns3Error::Unreachable(format!(
                "no connected compute (known: {})",
                names.join(", ")
            )))
        }
    }

    async fn project_by_name(&self, name: &str) -> Result<Option<Project>, Gns3Error> {
        let resp = self.send(self.get("/projects"), "list projects").await?;
        let projects: Vec<Project> = resp.json().await?;
        Ok(projects.into_iter().find(|p| p.name == name))
    }

    async fn create_project(
        &self,
        name: &str,
        scene_width: u32,
        scene_height: u32,
        grid_unit: u32,
    ) -> Result<Project, Gns3Error> {
        log::info!("[gns3] creating project {name}");
        let body = json!({
            "name": name,
            "scene_width": scene_width,
            "scene_height": scene_height,
            "grid_size": grid_unit,
        });
        let resp = self
            .send(
                self.post("/projects").json(&body),
                format!("create project {name}"),
            )
            .await?;
        Ok(resp.json().await?)
    }

    async fn open_project(&self, project: &Project) -> Result<(), Gns3Error> {
        if project.status == "opened" {
            return Ok(());
        }
        log::debug!("[gns3] opening project {}", project.name);
        let path = format!("/projects/{}/open", project.id);
        self.send(self.post(&path).json(&json!({})), "open project")
            .await?;
        Ok(())
    }

    async fn list_nodes(&self, project: &Project) -> Result<Vec<NodeHandle>, Gns3Error> {
        let path = format!("/projects/{}/nodes", project.id);
        let resp = self.send(self.get(&path), "list nodes").await?;
        Ok(resp.json().await?)
    }

    async fn list_templates(&self) -> Result<Vec<Template>, Gns3Error> {
        let resp = self.send(self.get("/templates"), "list templates").await?;
        Ok(resp.json().await?)
    }

    async fn create_node(
        &self,
        project: &Project,
        template_id: &str,
        name: &str,
        x: i32,
        y: i32,
    ) -> Result<NodeHandle, Gns3Error> {
        log::debug!("[{name}] creating node at ({x}, {y})");
        let path = format!("/projects/{}/templates/{template_id}", project.id);
        let resp = self
            .send(
                self.post(&path).json(&json!({"x": x, "y": y})),
                format!("create node {name}"),
            )
            .await?;
        let node: NodeHandle = resp.json().await?;
        // The platform assigns a template-derived name; rename to the registry name so that
        // later runs can re-associate nodes with the specification.
        let rename = format!("/projects/{}/nodes/{}", project.id, node.id);
        self.send(
            self.put(&rename).json(&json!({ "name": name })),
            format!("rename node {name}"),
        )
        .await?;
        Ok(NodeHandle {
            id: node.id,
            name: name.to_string(),
        })
    }

    async fn create_link(
        &self,
        project: &Project,
        node_a: &str,
        port_a: u32,
        node_b: &str,
        port_b: u32,
    ) -> Result<(), Gns3Error> {
        log::trace!("[gns3] link {node_a}:{port_a} <-> {node_b}:{port_b}");
        let body = json!({
            "nodes": [
                {"node_id": node_a, "adapter_number": port_a, "port_number": 0},
                {"node_id": node_b, "adapter_number": port_b, "port_number": 0},
            ]
        });
        let path = format!("/projects/{}/links", project.id);
        match self
            .send(self.post(&path).json(&body), "create link")
            .await
        {
            Ok(_) => Ok(()),
            Err(Gns3Error::Api {
                status: StatusCode::CONFLICT,
                message,
                ..
            }) if message.to_lowercase().contains("port") => Err(Gns3Error::PortInUse {
                node: node_a.to_string(),
                port: port_a,
            }),
            Err(e) => Err(e),
        }
    }

    async fn node_environment(
        &self,
        project: &Project,
        node_id: &str,
    ) -> Result<String, Gns3Error> {
        let node = self.node_json(project, node_id).await?;
        Ok(Self::node_property(&node, "environment"))
    }

    async fn set_node_environment(
        &self,
        project: &Project,
        node_id: &str,
        environment: &str,
    ) -> Result<(), Gns3Error> {
        let path = format!("/projects/{}/nodes/{node_id}", project.id);
        let body = json!({"properties": {"environment": environment}});
        self.send(self.put(&path).json(&body), format!("set environment of {node_id}"))
            .await?;
        Ok(())
    }

    async fn set_node_extra_hosts(
        &self,
        project: &Project,
        node_id: &str,
        extra_hosts: &str,
    ) -> Result<(), Gns3Error> {
        let path = format!("/projects/{}/nodes/{node_id}", project.id);
        let body = json!({"properties": {"extra_hosts": extra_hosts}});
        self.send(self.put(&path).json(&body), format!("set extra hosts of {node_id}"))
            .await?;
        Ok(())
    }

    async fn write_node_file(
        &self,
        project: &Project,
        node_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), Gns3Error> {
        let url = format!("/projects/{}/nodes/{node_id}/files/{path}", project.id);
        self.send(
            self.post(&url).body(content.to_string()),
            format!("write {path} on {node_id}"),
        )
        .await?;
        Ok(())
    }

    async fn console_endpoint(
        &self,
        project: &Project,
        node_id: &str,
    ) -> Result<(String, u16), Gns3Error> {
        let node = self.node_json(project, node_id).await?;
        let host = node
            .get("console_host")
            .and_then(|v| v.as_str())
            .unwrap_or("127.0.0.1")
            .to_string();
        let port = node
            .get("console")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Gns3Error::NodeNotFound(format!("{node_id} has no console")))?;
        Ok((host, port as u16))
    }

    async fn start_node(&self, project: &Project, node_id: &str) -> Result<(), Gns3Error> {
        let path = format!("/projects/{}/nodes/{node_id}/start", project.id);
        self.send(self.post(&path).json(&json!({})), format!("start node {node_id}"))
            .await?;
        Ok(())
    }
}

/// Resolve every template name used by a topology to its platform id. Each name is resolved
/// exactly once; the resulting map is treated as immutable for the rest of the run.
pub fn resolve_templates<'a>(
    templates: &[Template],
    names: impl IntoIterator<Item = &'a str>,
) -> Result<HashMap<String, String>, Gns3Error> {
    let mut resolved = HashMap::new();
    for name in names {
        if resolved.contains_key(name) {
            continue;
        }
        let template = templates.iter().find(|t| t.name == name).ok_or_else(|| {
            Gns3Error::Api {
                context: format!("resolve template {name}"),
                status: StatusCode::NOT_FOUND,
                message: format!("no template named {name:?} on the platform"),
            }
        })?;
        resolved.insert(name.to_string(), template.id.clone());
    }
    Ok(resolved)
}
