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

//! Module for managing router console sessions.
//!
//! Router images are provisioned over the raw telnet console the platform exposes for each
//! node. The session is prompt-driven: after each line we wait until the console prints the
//! expected prompt again, then settle for a configurable delay before the next line. Router
//! consoles drop characters when flooded, so pacing is load-bearing, not cosmetic.

use std::time::Duration;

use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{sleep, timeout},
};

use crate::{
    gns3::Emulator,
    topology::{NodeKind, BACKBONE_ROUTERS},
    Active, IotLab, LabError,
};

/// Error kind returned by [`ConsoleSession`].
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Error while interacting with the console socket.
    #[error("Console I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The expected prompt did not appear in time.
    #[error("Timeout on console of {0} while waiting for {1:?}")]
    Timeout(String, String),
    /// The console closed the connection.
    #[error("Console of {0} closed the connection")]
    Closed(String),
}

/// A raw telnet session with the console of a single router node.
#[derive(Debug)]
pub struct ConsoleSession {
    name: String,
    stream: TcpStream,
}

impl ConsoleSession {
    /// Connect to a node's console endpoint.
    pub async fn connect(
        name: impl Into<String>,
        host: &str,
        port: u16,
    ) -> Result<Self, ConsoleError> {
        let name = name.into();
        log::trace!("[{name}] connecting to console at {host}:{port}...");
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self { name, stream })
    }

    /// The node this console belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a single line, terminated with `\r\n`.
    pub async fn send_line(&mut self, line: &str) -> Result<(), ConsoleError> {
        log::trace!("[{}] `{line}`", self.name);
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read from the console until the output ends with `prompt`, and return everything read
    /// before the prompt. Fails with [`ConsoleError::Timeout`] if the prompt does not appear
    /// within `duration`.
    pub async fn wait_prompt(
        &mut self,
        prompt: &str,
        duration: Duration,
    ) -> Result<Vec<u8>, ConsoleError> {
        match timeout(duration, self.wait_prompt_no_timeout(prompt)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("[{}] timeout waiting for {prompt:?}", self.name);
                Err(ConsoleError::Timeout(
                    self.name.clone(),
                    prompt.to_string(),
                ))
            }
        }
    }

    async fn wait_prompt_no_timeout(&mut self, prompt: &str) -> Result<Vec<u8>, ConsoleError> {
        let prompt = prompt.as_bytes();
        let mut buffer = Vec::new();
        let mut counter_zero = 0;
        while !buffer.ends_with(prompt) {
            let num = self.stream.read_buf(&mut buffer).await?;
            if num == 0 {
                counter_zero += 1;
                if counter_zero >= 10 {
                    return Err(ConsoleError::Closed(self.name.clone()));
                }
            }
        }
        buffer.truncate(buffer.len() - prompt.len());
        Ok(buffer)
    }

    /// Wake the console and log in. Freshly booted images sit on a blank screen until they
    /// receive input, so a newline is sent first.
    pub async fn login(
        &mut self,
        user: &str,
        password: &str,
        prompt_timeout: Duration,
    ) -> Result<(), ConsoleError> {
        self.send_line("").await?;
        self.wait_prompt("login:", prompt_timeout).await?;
        self.send_line(user).await?;
        self.wait_prompt("Password:", prompt_timeout).await?;
        self.send_line(password).await?;
        // both the post-login shell prompt and the installer end in `$`
        self.wait_prompt("$", prompt_timeout).await?;
        log::debug!("[{}] logged in", self.name);
        Ok(())
    }

    /// Run the image installer dialog, accepting every default answer, and wait through the
    /// partitioning step. The image keeps its running configuration across the install.
    pub async fn install_image(
        &mut self,
        password: &str,
        settle: Duration,
    ) -> Result<(), ConsoleError> {
        log::debug!("[{}] installing image to disk", self.name);
        self.send_line("install image").await?;
        // the dialog asks: continue, partitioning, image name, config copy, then passwords
        for _ in 0..4 {
            self.wait_prompt(":", Duration::from_secs(60)).await?;
            self.send_line("").await?;
        }
        self.wait_prompt("password:", Duration::from_secs(60)).await?;
        self.send_line(password).await?;
        self.wait_prompt("password:", Duration::from_secs(60)).await?;
        self.send_line(password).await?;
        self.wait_prompt(":", Duration::from_secs(60)).await?;
        self.send_line("").await?;
        self.wait_prompt("$", Duration::from_secs(120)).await?;
        sleep(settle).await;
        Ok(())
    }

    /// Send a configuration script line by line, settling after every line. Blank lines and
    /// `#` comments are skipped.
    pub async fn run_config_script(
        &mut self,
        script: &str,
        settle: Duration,
    ) -> Result<(), ConsoleError> {
        for line in script.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.send_line(line).await?;
            sleep(settle).await;
        }
        Ok(())
    }
}

impl<'a, E: Emulator> IotLab<'a, Active<E>> {
    /// Provision every running router over its console: optionally install the image to disk,
    /// then replay the router's configuration script. Backbone routers take their script from
    /// the backbone directory, zone routers from the zone directory; each script is named
    /// `<router>.sh`.
    pub(crate) async fn provision_routers(&mut self) -> Result<(), LabError> {
        let settle = Duration::from_secs(self.config.provision.settle_secs);
        let login_timeout = Duration::from_secs(120);

        let routers: Vec<String> = self
            .plan
            .registry
            .iter()
            .filter(|n| n.kind == NodeKind::Router)
            .map(|n| n.name.clone())
            .collect();

        for name in routers {
            let dir = if BACKBONE_ROUTERS.contains(&name.as_str()) {
                &self.config.provision.backbone_config_dir
            } else {
                &self.config.provision.zone_config_dir
            };
            let path = dir.join(format!("{name}.sh"));
            let script = tokio::fs::read_to_string(&path).await?;

            log::info!("[{name}] provisioning over console");
            let id = self.plan.registry.get(&name)?.id()?.to_string();
            let (host, port) = self
                .state
                .client
                .console_endpoint(&self.state.project, &id)
                .await?;
            let mut console = ConsoleSession::connect(&name, &host, port).await?;
            console
                .login(
                    &self.config.provision.router_user,
                    &self.config.provision.router_password,
                    login_timeout,
                )
                .await?;
            if self.config.provision.install_image {
                console
                    .install_image(&self.config.provision.router_password, settle)
                    .await?;
            }
            console.run_config_script(&script, settle).await?;
            log::debug!("[{name}] provisioned");
        }
        Ok(())
    }
}
