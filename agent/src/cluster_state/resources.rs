use std::collections::HashMap;

use node_pinger_net::data_types::VersionNumber;
use serde::{Deserialize, Serialize};

pub trait Versioned {
    fn version(self: &Self) -> VersionNumber;
    fn set_version(self: &mut Self, version: VersionNumber);
}

pub trait Keyed {
    fn type_name(self: &Self) -> &'static str;
    fn key(self: &Self) -> String;
}

/// Identifies a stored record without having to load it
pub struct Key {
    type_name: &'static str,
    key: String,
}

#[rustfmt::skip]
impl Keyed for Key {
    fn type_name(self: &Self) -> &'static str { self.type_name }
    fn key(self: &Self) -> String { self.key.clone() }
}

/// A machine in the cluster. Other components read the `ping-<node>` labels to find
/// out how far apart nodes are.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NodeResource {
    pub version: VersionNumber,
    pub name: String,
    pub addresses: Vec<String>,
    pub labels: HashMap<String, String>,
}

#[rustfmt::skip]
impl NodeResource {
    pub fn new(name: &str, addresses: &[&str]) -> Self {
        Self {
            version: 0,
            name: name.to_owned(),
            addresses: addresses.iter().map(|a| (*a).to_owned()).collect(),
            labels: HashMap::new(),
        }
    }
    pub fn key(name: &str) -> impl Keyed {
        Key {
            type_name: NodeResource::type_name(),
            key: NodeResource::key_from(name),
        }
    }
    pub fn type_name() -> &'static str { "Node" }
    fn key_from(name: &str) -> String { name.to_owned() }
}

#[rustfmt::skip]
impl Keyed for NodeResource {
    fn type_name(self: &Self) -> &'static str { NodeResource::type_name() }
    fn key(self: &Self) -> String { NodeResource::key_from(&self.name) }
}

#[rustfmt::skip]
impl Versioned for NodeResource {
    fn version(self: &Self) -> VersionNumber { self.version }
    fn set_version(self: &mut Self, version: VersionNumber) { self.version = version }
}

/// A running instance of the agent, scheduled onto exactly one node
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PodResource {
    pub version: VersionNumber,
    pub name: String,
    pub namespace: String,
    pub node_name: String,
}

#[rustfmt::skip]
impl PodResource {
    pub fn new(name: &str, namespace: &str, node_name: &str) -> Self {
        Self {
            version: 0,
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            node_name: node_name.to_owned(),
        }
    }
    pub fn key(name: &str, namespace: &str) -> impl Keyed {
        Key {
            type_name: PodResource::type_name(),
            key: PodResource::key_from(name, namespace),
        }
    }
    pub fn type_name() -> &'static str { "Pod" }
    fn key_from(name: &str, namespace: &str) -> String { format!("{namespace}/{name}") }
}

#[rustfmt::skip]
impl Keyed for PodResource {
    fn type_name(self: &Self) -> &'static str { PodResource::type_name() }
    fn key(self: &Self) -> String { PodResource::key_from(&self.name, &self.namespace) }
}

#[rustfmt::skip]
impl Versioned for PodResource {
    fn version(self: &Self) -> VersionNumber { self.version }
    fn set_version(self: &mut Self, version: VersionNumber) { self.version = version }
}
