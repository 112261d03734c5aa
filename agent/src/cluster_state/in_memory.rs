use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
};

use async_trait::async_trait;
use node_pinger_net::data_types::VersionNumber;
use rmp_serde::Serializer;
use serde::{de::DeserializeOwned, Serialize};

use super::{
    ClusterState, Keyed, NodeResource, PodResource, ReadError, ReadResult, ReplaceError,
    ReplaceResult, Versioned,
};

pub struct StoredEntity {
    pub version: VersionNumber,
    pub serialization: Vec<u8>,
}

type EntityMap = BTreeMap<String, StoredEntity>;

/// Keeps the cluster state in process memory. Entities are serialized on the way in and
/// deserialized on the way out so that callers never share a record with the store.
/// Used in tests and for running a single agent in development.
pub struct InMemoryClusterState {
    type_map: RwLock<HashMap<&'static str, EntityMap>>,
}

impl InMemoryClusterState {
    pub fn new() -> Self {
        Self {
            type_map: RwLock::new(HashMap::new()),
        }
    }

    /// Stores a node record unconditionally, as another cluster actor would. The stored
    /// version is one more than the version it replaces.
    pub fn put_node(self: &Self, mut node: NodeResource) -> ReplaceResult {
        self.save(&mut node, false)
    }

    pub fn put_pod(self: &Self, mut pod: PodResource) -> ReplaceResult {
        self.save(&mut pod, false)
    }

    pub fn remove_node(self: &Self, name: &str) -> bool {
        let key = NodeResource::key(name);
        match self.type_map.write() {
            Ok(mut type_map) => type_map
                .get_mut(key.type_name())
                .map_or(false, |entities| entities.remove(&key.key()).is_some()),
            Err(_) => false,
        }
    }

    /// Reads a node record without going through the async interface
    pub fn node(self: &Self, name: &str) -> ReadResult<NodeResource> {
        self.load(&NodeResource::key(name))
    }

    fn save<T: Versioned + Keyed + Serialize>(
        self: &Self,
        entity: &mut T,
        check_version: bool,
    ) -> ReplaceResult {
        let type_name = entity.type_name();
        let key = entity.key();

        let mut type_map = self.type_map.write().map_err(|_| ReplaceError::Error {
            msg: "in-memory cluster state lock is poisoned".to_owned(),
        })?;
        let entity_map = type_map.entry(type_name).or_insert_with(BTreeMap::new);

        let version = match entity_map.get(&key) {
            Some(saved_entity) => {
                if check_version && saved_entity.version != entity.version() {
                    return Err(ReplaceError::Conflict {
                        entity_key: key,
                        expected: entity.version(),
                        actual: saved_entity.version,
                    });
                }
                saved_entity.version + 1
            }
            None => {
                if check_version {
                    return Err(ReplaceError::NotFound {
                        entity_type: type_name.to_owned(),
                        entity_key: key,
                    });
                }
                1
            }
        };

        let previous_version = entity.version();
        entity.set_version(version);

        let mut buffer = Vec::new();
        let mut serializer = Serializer::new(&mut buffer);
        if let Err(e) = entity.serialize(&mut serializer) {
            entity.set_version(previous_version);
            return Err(ReplaceError::Error {
                msg: format!("failed to serialize {type_name} '{key}': {e}"),
            });
        }

        entity_map.insert(
            key,
            StoredEntity {
                version,
                serialization: buffer,
            },
        );
        Ok(())
    }

    fn load<T: DeserializeOwned>(self: &Self, keyed: &impl Keyed) -> ReadResult<T> {
        let type_map = self.type_map.read().map_err(|_| ReadError::Error {
            msg: "in-memory cluster state lock is poisoned".to_owned(),
        })?;

        match type_map
            .get(keyed.type_name())
            .and_then(|entities| entities.get(&keyed.key()))
        {
            Some(stored_entity) => deserialize(keyed.type_name(), stored_entity),
            None => Err(ReadError::NotFound {
                entity_type: keyed.type_name().to_owned(),
                entity_key: keyed.key(),
            }),
        }
    }

    fn load_all<T: DeserializeOwned>(self: &Self, type_name: &'static str) -> ReadResult<Vec<T>> {
        let type_map = self.type_map.read().map_err(|_| ReadError::Error {
            msg: "in-memory cluster state lock is poisoned".to_owned(),
        })?;

        match type_map.get(type_name) {
            Some(entities) => entities
                .values()
                .map(|stored_entity| deserialize(type_name, stored_entity))
                .collect(),
            None => Ok(Vec::new()),
        }
    }
}

impl Default for InMemoryClusterState {
    fn default() -> Self {
        Self::new()
    }
}

fn deserialize<T: DeserializeOwned>(type_name: &str, stored_entity: &StoredEntity) -> ReadResult<T> {
    rmp_serde::from_slice(&stored_entity.serialization).map_err(|e| ReadError::Error {
        msg: format!("failed to deserialize {type_name}: {e}"),
    })
}

#[async_trait]
impl ClusterState for InMemoryClusterState {
    async fn list_nodes(self: &Self) -> ReadResult<Vec<NodeResource>> {
        self.load_all(NodeResource::type_name())
    }

    async fn read_node(self: &Self, name: &str) -> ReadResult<NodeResource> {
        self.load(&NodeResource::key(name))
    }

    async fn read_pod(self: &Self, name: &str, namespace: &str) -> ReadResult<PodResource> {
        self.load(&PodResource::key(name, namespace))
    }

    async fn replace_node(self: &Self, node: &mut NodeResource) -> ReplaceResult {
        self.save(node, true)
    }
}
