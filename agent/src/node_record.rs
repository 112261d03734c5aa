use std::collections::BTreeMap;

use node_pinger_net::data_types::Distance;

use crate::cluster_state::NodeResource;

pub const DISTANCE_LABEL_PREFIX: &str = "ping-";

/// The label that holds the distance to `node_name`
pub fn distance_label(node_name: &str) -> String {
    format!("{DISTANCE_LABEL_PREFIX}{node_name}")
}

/// The distances measured during one cycle, in the order the peers were probed. These
/// are kept apart from the node record so that they can be applied again to a fresh
/// copy of the record if saving the first one fails.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DistanceUpdates {
    updates: Vec<(String, Distance)>,
    unreachable_count: usize,
}

impl DistanceUpdates {
    pub fn new() -> Self {
        Self {
            updates: Vec::new(),
            unreachable_count: 0,
        }
    }

    pub fn push(self: &mut Self, peer_name: &str, distance: Distance) {
        self.updates.push((peer_name.to_owned(), distance));
    }

    /// Records `distance` for a peer that could not be measured
    pub fn push_unreachable(self: &mut Self, peer_name: &str, distance: Distance) {
        self.push(peer_name, distance);
        self.unreachable_count += 1;
    }

    #[rustfmt::skip]
    pub fn len(self: &Self) -> usize { self.updates.len() }
    #[rustfmt::skip]
    pub fn unreachable_count(self: &Self) -> usize { self.unreachable_count }

    pub fn iter(self: &Self) -> impl Iterator<Item = (&str, Distance)> {
        self.updates.iter().map(|(name, distance)| (name.as_str(), *distance))
    }
}

/// This node's record from the cluster state, loaded at the start of a cycle and
/// changed in memory until it is saved at the end of the cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    resource: NodeResource,
}

impl NodeRecord {
    pub fn new(resource: NodeResource) -> Self {
        Self { resource }
    }

    #[rustfmt::skip]
    pub fn name(self: &Self) -> &str { &self.resource.name }
    #[rustfmt::skip]
    pub fn resource_mut(self: &mut Self) -> &mut NodeResource { &mut self.resource }

    /// Adds the distance to this node itself, which is always zero. An existing value
    /// is left alone. Returns true if the label was added.
    pub fn ensure_self_label(self: &mut Self) -> bool {
        let label = distance_label(&self.resource.name);
        if self.resource.labels.contains_key(&label) {
            return false;
        }
        self.resource.labels.insert(label, 0.to_string());
        true
    }

    pub fn set_distance(self: &mut Self, peer_name: &str, distance: Distance) {
        self.resource
            .labels
            .insert(distance_label(peer_name), distance.to_string());
    }

    pub fn apply(self: &mut Self, updates: &DistanceUpdates) {
        for (peer_name, distance) in updates.iter() {
            self.set_distance(peer_name, distance);
        }
    }

    /// The label value for the distance to `peer_name`, exactly as stored
    pub fn distance(self: &Self, peer_name: &str) -> Option<&str> {
        self.resource
            .labels
            .get(&distance_label(peer_name))
            .map(|value| value.as_str())
    }

    /// All labels on the record, sorted by key
    pub fn snapshot(self: &Self) -> BTreeMap<&str, &str> {
        self.resource
            .labels
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect()
    }
}
