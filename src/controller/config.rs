// SPDX-License-Identifier: GPL-3.0-or-later
//! The controller's static node registry: no dynamic discovery, the
//! fleet is configured up front and fixed for the life of the process.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::wire::PortProfile;

/// One fleet member as the controller knows it: a logical name, network
/// address, and the port profile to address it on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEntry {
    pub logical_name: String,
    pub address: IpAddr,
    pub ports: PortProfile,
}

/// The full fleet registry, keyed by logical name for lookups and
/// additionally indexable by address for demultiplexing inbound
/// datagrams/connections.
#[derive(Clone, Debug, Default)]
pub struct NodeRegistry {
    by_name: HashMap<String, NodeEntry>,
    by_address: HashMap<IpAddr, String>,
}

impl NodeRegistry {
    pub fn new(entries: impl IntoIterator<Item = NodeEntry>) -> Self {
        let mut registry = Self::default();
        for entry in entries {
            registry.by_address.insert(entry.address, entry.logical_name.clone());
            registry.by_name.insert(entry.logical_name.clone(), entry);
        }
        registry
    }

    pub fn get(&self, logical_name: &str) -> Option<&NodeEntry> {
        self.by_name.get(logical_name)
    }

    /// Resolve a logical name from the address a datagram or connection
    /// arrived from. Returns `None` for an unrecognized sender, which
    /// callers treat as "drop".
    pub fn resolve(&self, address: IpAddr) -> Option<&NodeEntry> {
        self.by_address.get(&address).and_then(|name| self.by_name.get(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeEntry> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
