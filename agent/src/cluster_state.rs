/*
Access to the cluster's shared state. The agent needs four things from it:
- the list of nodes in the cluster and their addresses
- the record of the pod it is running in, to find out which node it is on
- the record of that node, so that it can update the distance labels
- a way to replace the node record that fails if somebody else changed it first

Every record carries a version number. Replacing a record only succeeds if the version
in the record matches the stored version, and a successful replace bumps the version.
This is the only coordination between the agent and other writers of the same record.
*/

pub mod file_system;
pub mod in_memory;
pub mod resources;

use std::{fmt::Display, path::Path, sync::Arc};

use async_trait::async_trait;
use node_pinger_net::data_types::VersionNumber;

pub use resources::{Keyed, NodeResource, PodResource, Versioned};

#[derive(Debug, Clone, PartialEq)]
pub enum ReadError {
    NotFound {
        entity_type: String,
        entity_key: String,
    },
    Error {
        msg: String,
    },
}

pub type ReadResult<T> = Result<T, ReadError>;

#[derive(Debug, Clone, PartialEq)]
pub enum ReplaceError {
    Conflict {
        entity_key: String,
        expected: VersionNumber,
        actual: VersionNumber,
    },
    NotFound {
        entity_type: String,
        entity_key: String,
    },
    Error {
        msg: String,
    },
}

pub type ReplaceResult = Result<(), ReplaceError>;

impl Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::NotFound { entity_type, entity_key } => {
                write!(f, "{entity_type} '{entity_key}' was not found")
            }
            ReadError::Error { msg } => write!(f, "{msg}"),
        }
    }
}

impl Display for ReplaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplaceError::Conflict { entity_key, expected, actual } => write!(
                f,
                "'{entity_key}' was modified concurrently (expected version {expected}, found {actual})"
            ),
            ReplaceError::NotFound { entity_type, entity_key } => {
                write!(f, "{entity_type} '{entity_key}' was not found")
            }
            ReplaceError::Error { msg } => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ReadError {}
impl std::error::Error for ReplaceError {}

#[async_trait]
pub trait ClusterState: Send + Sync {
    /// Returns every node record in the cluster
    async fn list_nodes(self: &Self) -> ReadResult<Vec<NodeResource>>;

    async fn read_node(self: &Self, name: &str) -> ReadResult<NodeResource>;

    async fn read_pod(self: &Self, name: &str, namespace: &str) -> ReadResult<PodResource>;

    /// Replaces the stored node record if its version matches. On success the version
    /// of `node` is updated to the newly stored version.
    async fn replace_node(self: &Self, node: &mut NodeResource) -> ReplaceResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStateScheme {
    InMemory,
    FileSystem,
}

impl ClusterStateScheme {
    pub fn from_string(scheme: &str) -> Option<Self> {
        match scheme {
            "in-memory" => Some(ClusterStateScheme::InMemory),
            "file-system" => Some(ClusterStateScheme::FileSystem),
            _ => None,
        }
    }
}

pub fn build_cluster_state(scheme: ClusterStateScheme, state_path: &Path) -> Arc<dyn ClusterState> {
    match scheme {
        ClusterStateScheme::InMemory => Arc::new(in_memory::InMemoryClusterState::new()),
        ClusterStateScheme::FileSystem => {
            Arc::new(file_system::FileSystemClusterState::new(state_path))
        }
    }
}
