#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use node_pinger_agent::{
    cluster_state::{
        in_memory::InMemoryClusterState, ClusterState, NodeResource, PodResource, ReadError,
        ReadResult, ReplaceError, ReplaceResult,
    },
    observability::Metrics,
    reconciler::Reconciler,
    rtt_probe::{ProbeOptions, RttProbe},
    settings::RuntimeIdentity,
};
use node_pinger_net::echo::{EchoError, EchoReply, EchoResult, EchoTransport};

pub const NAMESPACE: &str = "monitoring";
pub const POD_NAME: &str = "node-pinger-a1";

/// Echo transport that answers each address with a fixed reply, or with a transport
/// error for addresses that have no reply configured
pub struct ScriptedEcho {
    replies: HashMap<String, EchoReply>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedEcho {
    pub fn new(replies: &[(&str, EchoReply)]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies
                .iter()
                .map(|(address, reply)| ((*address).to_owned(), *reply))
                .collect(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests_to(self: &Self, address: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|a| *a == address).count()
    }
}

#[async_trait]
impl EchoTransport for ScriptedEcho {
    async fn echo(self: &Self, address: &str) -> EchoResult {
        self.requests.lock().unwrap().push(address.to_owned());
        match self.replies.get(address) {
            Some(reply) => Ok(*reply),
            None => Err(EchoError::Transport {
                msg: format!("no route to {address}"),
            }),
        }
    }
}

/// Wraps the in-memory cluster state to count calls and inject failures
pub struct InstrumentedClusterState {
    pub inner: InMemoryClusterState,
    pub node_reads: AtomicUsize,
    pub node_replaces: AtomicUsize,
    pub node_lists: AtomicUsize,
    failing_replaces: AtomicUsize,
    fail_listing: AtomicBool,
    concurrent_writer: Mutex<Option<(String, String)>>,
}

impl InstrumentedClusterState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryClusterState::new(),
            node_reads: AtomicUsize::new(0),
            node_replaces: AtomicUsize::new(0),
            node_lists: AtomicUsize::new(0),
            failing_replaces: AtomicUsize::new(0),
            fail_listing: AtomicBool::new(false),
            concurrent_writer: Mutex::new(None),
        })
    }

    /// The next `count` replaces fail with a conflict without touching the store
    pub fn fail_replaces(self: &Self, count: usize) {
        self.failing_replaces.store(count, Ordering::SeqCst);
    }

    pub fn fail_listing(self: &Self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Before the next replace, another writer adds this label to the stored record,
    /// which makes the replace conflict for real
    pub fn write_label_before_next_replace(self: &Self, key: &str, value: &str) {
        *self.concurrent_writer.lock().unwrap() = Some((key.to_owned(), value.to_owned()));
    }

    #[rustfmt::skip]
    pub fn reads(self: &Self) -> usize { self.node_reads.load(Ordering::SeqCst) }
    #[rustfmt::skip]
    pub fn replaces(self: &Self) -> usize { self.node_replaces.load(Ordering::SeqCst) }
}

#[async_trait]
impl ClusterState for InstrumentedClusterState {
    async fn list_nodes(self: &Self) -> ReadResult<Vec<NodeResource>> {
        self.node_lists.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ReadError::Error {
                msg: "the server is currently unable to handle the request".to_owned(),
            });
        }
        self.inner.list_nodes().await
    }

    async fn read_node(self: &Self, name: &str) -> ReadResult<NodeResource> {
        self.node_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_node(name).await
    }

    async fn read_pod(self: &Self, name: &str, namespace: &str) -> ReadResult<PodResource> {
        self.inner.read_pod(name, namespace).await
    }

    async fn replace_node(self: &Self, node: &mut NodeResource) -> ReplaceResult {
        self.node_replaces.fetch_add(1, Ordering::SeqCst);

        let concurrent_write = self.concurrent_writer.lock().unwrap().take();
        if let Some((key, value)) = concurrent_write {
            let mut stored = self.inner.node(&node.name).unwrap();
            stored.labels.insert(key, value);
            self.inner.put_node(stored).unwrap();
        }

        let failing = self.failing_replaces.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_replaces.store(failing - 1, Ordering::SeqCst);
            return Err(ReplaceError::Conflict {
                entity_key: node.name.clone(),
                expected: node.version,
                actual: node.version + 1,
            });
        }

        self.inner.replace_node(node).await
    }
}

pub fn add_node(state: &InMemoryClusterState, name: &str, addresses: &[&str]) {
    state.put_node(NodeResource::new(name, addresses)).unwrap();
}

pub fn add_agent_pod(state: &InMemoryClusterState, node_name: &str) {
    state.put_pod(PodResource::new(POD_NAME, NAMESPACE, node_name)).unwrap();
}

pub fn reconciler(
    cluster: Arc<dyn ClusterState>,
    transport: Arc<dyn EchoTransport>,
    metrics: Arc<Metrics>,
) -> Reconciler {
    let probe = RttProbe::new(transport, ProbeOptions::default(), metrics.clone());
    Reconciler::new(cluster, probe, RuntimeIdentity::new(POD_NAME, NAMESPACE), metrics)
}
