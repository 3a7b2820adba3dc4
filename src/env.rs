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

//! Typed runtime configuration for container nodes.
//!
//! Container images read their configuration from environment variables. The emulation platform
//! stores the whole environment of a node as a single `KEY=value` newline-separated string, which
//! is read, modified and written back wholesale. Some images probe for key *presence*, so a key
//! that is set to the empty string is different from a key that is absent. [`Environment`] keeps
//! that distinction, and [`EnvKey`] is the closed set of keys this crate ever writes.

use std::{collections::BTreeMap, fmt, net::Ipv4Addr};

/// The configuration keys that are injected into device containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnvKey {
    /// Hostname of the MQTT broker the device connects to.
    MqttBrokerAddr,
    /// Whether the device talks TLS to its broker. Always written, possibly blank.
    Tls,
    /// `user:password` credential for authenticated brokers. Always written, possibly blank.
    MqttAuth,
    /// Hostname of the NTP server used for clock synchronization (needed for TLS).
    NtpServer,
    /// The `a.b.c.x-a.b.c.y` member list of a device cluster, consumed by cloud nodes.
    CoapAddrList,
    /// Set on cloud endpoints that use a pre-shared key instead of certificates.
    Psk,
}

impl EnvKey {
    /// The variable name as it appears in the container environment.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::MqttBrokerAddr => "MQTT_BROKER_ADDR",
            EnvKey::Tls => "TLS",
            EnvKey::MqttAuth => "MQTT_AUTH",
            EnvKey::NtpServer => "NTP_SERVER",
            EnvKey::CoapAddrList => "COAP_ADDR_LIST",
            EnvKey::Psk => "PSK",
        }
    }
}

impl fmt::Display for EnvKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded node environment. Keys not touched by this crate are preserved verbatim, so a
/// read-modify-write cycle never loses variables baked into the image template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment(BTreeMap<String, String>);

impl Environment {
    /// Decode the newline-separated `KEY=value` string stored by the platform. Blank lines are
    /// skipped; a line without `=` is treated as a key that is present but blank.
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| match l.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (l.to_string(), String::new()),
                })
                .collect(),
        )
    }

    /// Encode back into the platform's string representation.
    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Look up a key. `None` means absent, `Some("")` means present but blank.
    pub fn get(&self, key: EnvKey) -> Option<&str> {
        self.0.get(key.as_str()).map(String::as_str)
    }

    /// Set a key, overwriting any previous value. An empty value keeps the key present.
    pub fn set(&mut self, key: EnvKey, value: impl Into<String>) {
        self.0.insert(key.as_str().to_string(), value.into());
    }

    /// Apply a batch of updates computed at planning time.
    pub fn apply(&mut self, updates: &BTreeMap<EnvKey, String>) {
        for (key, value) in updates {
            self.set(*key, value.clone());
        }
    }

    /// Number of variables in the environment.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the environment holds no variables at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Static DNS records pushed to the resolver node as "extra hosts" (`name:address` lines).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraHosts(BTreeMap<String, Ipv4Addr>);

impl ExtraHosts {
    /// Create an empty record set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a static record.
    pub fn insert(&mut self, name: impl Into<String>, addr: Ipv4Addr) {
        self.0.insert(name.into(), addr);
    }

    /// Decode the platform's `name:address` newline-separated string. Lines that do not parse are
    /// dropped, matching how the platform itself treats them.
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.lines()
                .filter_map(|l| l.trim().split_once(':'))
                .filter_map(|(name, addr)| Some((name.to_string(), addr.trim().parse().ok()?)))
                .collect(),
        )
    }

    /// Encode into the platform's string representation.
    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(name, addr)| format!("{name}:{addr}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether there are no records.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over all records in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Ipv4Addr)> {
        self.0.iter().map(|(name, addr)| (name.as_str(), *addr))
    }
}
