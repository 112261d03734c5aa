/*
Keeps the cluster state as one file per record under a root directory, for example a
volume that is mounted into every agent:

    <root>/nodes/<node name>
    <root>/pods/<namespace>/<pod name>

Records are serialized with MessagePack and include their version. Replacing a node
record writes a temporary file and renames it over the original, so readers never see
a partially written record. The version check and the rename are serialized within
this process only; each agent replaces only its own node record.
*/

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{fs, sync::Mutex};

use super::{
    ClusterState, Keyed, NodeResource, PodResource, ReadError, ReadResult, ReplaceError,
    ReplaceResult, Versioned,
};

const NODES_DIRECTORY: &str = "nodes";
const PODS_DIRECTORY: &str = "pods";
const TEMP_EXTENSION: &str = "tmp";

pub struct FileSystemClusterState {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSystemClusterState {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Writes a node record unconditionally, as another cluster actor would
    pub async fn put_node(self: &Self, mut node: NodeResource) -> ReplaceResult {
        let path = self.node_path(&node.name).map_err(|msg| ReplaceError::Error { msg })?;
        let _guard = self.write_lock.lock().await;
        let version = match read_entity::<NodeResource>(&path, &node).await {
            Ok(existing) => existing.version + 1,
            Err(ReadError::NotFound { .. }) => 1,
            Err(ReadError::Error { msg }) => return Err(ReplaceError::Error { msg }),
        };
        node.set_version(version);
        write_entity(&path, &node).await
    }

    pub async fn put_pod(self: &Self, mut pod: PodResource) -> ReplaceResult {
        let path = self
            .pod_path(&pod.name, &pod.namespace)
            .map_err(|msg| ReplaceError::Error { msg })?;
        let _guard = self.write_lock.lock().await;
        let version = match read_entity::<PodResource>(&path, &pod).await {
            Ok(existing) => existing.version + 1,
            Err(ReadError::NotFound { .. }) => 1,
            Err(ReadError::Error { msg }) => return Err(ReplaceError::Error { msg }),
        };
        pod.set_version(version);
        write_entity(&path, &pod).await
    }

    fn node_path(self: &Self, name: &str) -> Result<PathBuf, String> {
        check_segment(name)?;
        Ok(self.root.join(NODES_DIRECTORY).join(name))
    }

    fn pod_path(self: &Self, name: &str, namespace: &str) -> Result<PathBuf, String> {
        check_segment(name)?;
        check_segment(namespace)?;
        Ok(self.root.join(PODS_DIRECTORY).join(namespace).join(name))
    }
}

/// Rejects names that would escape the directory they are stored in
fn check_segment(segment: &str) -> Result<(), String> {
    if segment.is_empty()
        || segment.starts_with('.')
        || segment.contains('/')
        || segment.contains('\\')
    {
        Err(format!("'{segment}' can not be used as a record name"))
    } else {
        Ok(())
    }
}

// Starts with a dot so that listing skips it
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{file_name}.{TEMP_EXTENSION}"))
}

async fn read_entity<T: DeserializeOwned>(path: &Path, keyed: &impl Keyed) -> ReadResult<T> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ReadError::NotFound {
                entity_type: keyed.type_name().to_owned(),
                entity_key: keyed.key(),
            })
        }
        Err(e) => {
            return Err(ReadError::Error {
                msg: format!("failed to read {}: {e}", path.display()),
            })
        }
    };

    rmp_serde::from_slice(&bytes).map_err(|e| ReadError::Error {
        msg: format!("failed to deserialize {}: {e}", path.display()),
    })
}

async fn write_entity<T: Serialize + Keyed>(path: &Path, entity: &T) -> ReplaceResult {
    let bytes = rmp_serde::to_vec(entity).map_err(|e| ReplaceError::Error {
        msg: format!("failed to serialize {} '{}': {e}", entity.type_name(), entity.key()),
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| ReplaceError::Error {
            msg: format!("failed to create {}: {e}", parent.display()),
        })?;
    }

    let temp_path = temp_path_for(path);
    fs::write(&temp_path, &bytes).await.map_err(|e| ReplaceError::Error {
        msg: format!("failed to write {}: {e}", temp_path.display()),
    })?;
    fs::rename(&temp_path, path).await.map_err(|e| ReplaceError::Error {
        msg: format!("failed to rename {} to {}: {e}", temp_path.display(), path.display()),
    })?;

    debug!("FileSystemClusterState: wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

#[async_trait]
impl ClusterState for FileSystemClusterState {
    async fn list_nodes(self: &Self) -> ReadResult<Vec<NodeResource>> {
        let directory = self.root.join(NODES_DIRECTORY);
        let mut entries = match fs::read_dir(&directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ReadError::Error {
                    msg: format!("failed to list {}: {e}", directory.display()),
                })
            }
        };

        let mut names = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if check_segment(&name).is_ok() {
                        names.push(name);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    return Err(ReadError::Error {
                        msg: format!("failed to list {}: {e}", directory.display()),
                    })
                }
            }
        }
        names.sort();

        let mut nodes = Vec::with_capacity(names.len());
        for name in names {
            match self.read_node(&name).await {
                Ok(node) => nodes.push(node),
                // Deleted between listing the directory and reading the file
                Err(ReadError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(nodes)
    }

    async fn read_node(self: &Self, name: &str) -> ReadResult<NodeResource> {
        let path = self.node_path(name).map_err(|msg| ReadError::Error { msg })?;
        read_entity(&path, &NodeResource::key(name)).await
    }

    async fn read_pod(self: &Self, name: &str, namespace: &str) -> ReadResult<PodResource> {
        let path = self.pod_path(name, namespace).map_err(|msg| ReadError::Error { msg })?;
        read_entity(&path, &PodResource::key(name, namespace)).await
    }

    async fn replace_node(self: &Self, node: &mut NodeResource) -> ReplaceResult {
        let path = self.node_path(&node.name).map_err(|msg| ReplaceError::Error { msg })?;
        let _guard = self.write_lock.lock().await;

        let stored = match read_entity::<NodeResource>(&path, &*node).await {
            Ok(stored) => stored,
            Err(ReadError::NotFound { entity_type, entity_key }) => {
                return Err(ReplaceError::NotFound { entity_type, entity_key })
            }
            Err(ReadError::Error { msg }) => return Err(ReplaceError::Error { msg }),
        };

        if stored.version != node.version {
            return Err(ReplaceError::Conflict {
                entity_key: node.key(),
                expected: node.version,
                actual: stored.version,
            });
        }

        let previous_version = node.version;
        node.set_version(stored.version + 1);
        if let Err(e) = write_entity(&path, &*node).await {
            node.set_version(previous_version);
            return Err(e);
        }
        Ok(())
    }
}
