/*
The set of nodes that the agent probes, with the one address each that it probes them
on. The directory is rebuilt from the cluster state on every refresh so that nodes
that left the cluster stop being probed and nodes that rejoined are probed on their
new address. If the cluster state can't be listed, the previous directory is kept.
*/

use log::{debug, warn};

use crate::cluster_state::{ClusterState, NodeResource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    /// The directory was rebuilt from the current list of nodes
    Updated,

    /// Listing the nodes failed and the directory still holds the previous list
    Stale,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PeerDirectory {
    peers: Vec<PeerAddress>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self { peers: Vec::new() }
    }

    /// Builds a directory from node records. Nodes with no addresses can't be probed
    /// and are left out. If a name appears more than once the first one wins.
    pub fn from_nodes(nodes: &[NodeResource]) -> Self {
        let mut peers: Vec<PeerAddress> = Vec::with_capacity(nodes.len());

        for node in nodes {
            let address = match node.addresses.first() {
                Some(address) => address,
                None => {
                    debug!("PeerDirectory: node {} has no addresses, skipping it", node.name);
                    continue;
                }
            };

            if peers.iter().any(|peer| peer.name == node.name) {
                continue;
            }

            peers.push(PeerAddress {
                name: node.name.clone(),
                address: address.clone(),
            });
        }

        Self { peers }
    }

    pub async fn refresh(self: &mut Self, cluster: &dyn ClusterState) -> RefreshStatus {
        match cluster.list_nodes().await {
            Ok(nodes) => {
                *self = PeerDirectory::from_nodes(&nodes);
                debug!("PeerDirectory: refreshed with {} peers", self.peers.len());
                RefreshStatus::Updated
            }
            Err(e) => {
                warn!(
                    "PeerDirectory: error occured while getting nodes and addresses, keeping {} known peers. {e}",
                    self.peers.len()
                );
                RefreshStatus::Stale
            }
        }
    }

    #[rustfmt::skip]
    pub fn len(self: &Self) -> usize { self.peers.len() }
    #[rustfmt::skip]
    pub fn is_empty(self: &Self) -> bool { self.peers.is_empty() }

    pub fn iter(self: &Self) -> std::slice::Iter<'_, PeerAddress> {
        self.peers.iter()
    }

    pub fn get(self: &Self, name: &str) -> Option<&PeerAddress> {
        self.peers.iter().find(|peer| peer.name == name)
    }
}
