/*
Runs one cycle of the agent:

1. Find out which node this agent is on, load that node's record and make sure it has
   the zero distance to itself
2. Refresh the directory of peers
3. Measure the distance to every peer and apply the distances to the record
4. Log the labels on the record
5. Save the record. If that fails, load the record again, apply the same distances to
   it and save it one more time

Each step deals with its own failures. Nothing that goes wrong in a cycle stops the
agent; the next cycle starts from the cluster state again.
*/

use std::{fmt::Display, sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::{
    cluster_state::{ClusterState, ReadError, ReplaceError},
    node_record::{DistanceUpdates, NodeRecord},
    observability::Metrics,
    peer_directory::{PeerDirectory, RefreshStatus},
    rtt_probe::RttProbe,
    settings::RuntimeIdentity,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The record was saved on the first attempt
    Persisted,

    /// The first save failed and the save of the re-loaded record succeeded
    PersistedAfterRetry,

    /// Both saves failed, so this cycle's distances were not recorded
    PersistFailed,

    /// The pod or node record could not be read, so nothing was probed
    IdentityUnavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub node_name: Option<String>,
    pub directory_status: Option<RefreshStatus>,
    pub peers_probed: usize,
    pub unreachable_peers: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u128,
}

impl Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cycle started {} on node {} finished {:?} in {}ms, probed {} peers ({} unreachable)",
            self.started_at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.node_name.as_deref().unwrap_or("<unknown>"),
            self.outcome,
            self.duration_ms,
            self.peers_probed,
            self.unreachable_peers
        )
    }
}

pub struct Reconciler {
    cluster: Arc<dyn ClusterState>,
    probe: RttProbe,
    identity: RuntimeIdentity,
    metrics: Arc<Metrics>,
}

impl Reconciler {
    pub fn new(
        cluster: Arc<dyn ClusterState>,
        probe: RttProbe,
        identity: RuntimeIdentity,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cluster,
            probe,
            identity,
            metrics,
        }
    }

    /// Runs one cycle. The directory is carried from one cycle to the next by the caller
    /// so that a failed refresh can fall back on the peers found last time.
    pub async fn run_cycle(self: &Self, directory: &mut PeerDirectory) -> CycleReport {
        let started_at = Utc::now();
        let timer = Instant::now();
        self.metrics.incr(Metrics::METRIC_CYCLE_COUNT);

        let mut report = CycleReport {
            outcome: CycleOutcome::IdentityUnavailable,
            node_name: None,
            directory_status: None,
            peers_probed: 0,
            unreachable_peers: 0,
            started_at,
            duration_ms: 0,
        };

        match self.load_record().await {
            Ok(mut record) => {
                report.node_name = Some(record.name().to_owned());

                let directory_status = directory.refresh(self.cluster.as_ref()).await;
                if directory_status == RefreshStatus::Stale {
                    self.metrics.incr(Metrics::METRIC_DISCOVERY_ERROR_COUNT);
                }
                report.directory_status = Some(directory_status);

                let updates = self.probe.measure_all(directory, record.name()).await;
                record.apply(&updates);
                report.peers_probed = updates.len();
                report.unreachable_peers = updates.unreachable_count();

                self.log_labels(&record);
                report.outcome = self.persist(record, &updates).await;
            }
            Err(e) => {
                self.metrics.incr(Metrics::METRIC_IDENTITY_ERROR_COUNT);
                error!(
                    "Reconciler: unable to load the node record for pod {}/{}, skipping this cycle. {e}",
                    self.identity.namespace, self.identity.pod_name
                );
            }
        }

        report.duration_ms = timer.elapsed().as_millis();
        self.metrics.count(Metrics::METRIC_CYCLE_DURATION_MS, report.duration_ms as f64);
        self.metrics.flush();
        report
    }

    async fn load_record(self: &Self) -> Result<NodeRecord, ReadError> {
        let pod = self
            .cluster
            .read_pod(&self.identity.pod_name, &self.identity.namespace)
            .await?;
        self.read_record(&pod.node_name).await
    }

    async fn read_record(self: &Self, node_name: &str) -> Result<NodeRecord, ReadError> {
        let node = self.cluster.read_node(node_name).await?;
        let mut record = NodeRecord::new(node);
        record.ensure_self_label();
        Ok(record)
    }

    fn log_labels(self: &Self, record: &NodeRecord) {
        info!("Reconciler: labels for current node: {}", record.name());
        for (key, value) in record.snapshot() {
            info!("Reconciler:   {key}: {value}");
        }
    }

    async fn persist(self: &Self, mut record: NodeRecord, updates: &DistanceUpdates) -> CycleOutcome {
        let first_error = match self.cluster.replace_node(record.resource_mut()).await {
            Ok(()) => return CycleOutcome::Persisted,
            Err(e) => e,
        };
        self.count_replace_error(&first_error);
        warn!(
            "Reconciler: error occured while updating distances of node {}, reloading it and retrying once. {first_error}",
            record.name()
        );

        let mut fresh = match self.read_record(record.name()).await {
            Ok(fresh) => fresh,
            Err(e) => {
                self.metrics.incr(Metrics::METRIC_PERSIST_ERROR_COUNT);
                error!(
                    "Reconciler: unable to reload node {}, distances from this cycle are lost. {e}",
                    record.name()
                );
                return CycleOutcome::PersistFailed;
            }
        };
        fresh.apply(updates);

        self.metrics.incr(Metrics::METRIC_PERSIST_RETRY_COUNT);
        match self.cluster.replace_node(fresh.resource_mut()).await {
            Ok(()) => {
                info!("Reconciler: updated distances of node {} on retry", fresh.name());
                CycleOutcome::PersistedAfterRetry
            }
            Err(e) => {
                self.count_replace_error(&e);
                error!(
                    "Reconciler: retry failed, distances of node {} from this cycle are lost. {e}",
                    fresh.name()
                );
                CycleOutcome::PersistFailed
            }
        }
    }

    fn count_replace_error(self: &Self, e: &ReplaceError) {
        match e {
            ReplaceError::Conflict { .. } => self.metrics.incr(Metrics::METRIC_PERSIST_CONFLICT_COUNT),
            ReplaceError::NotFound { .. } | ReplaceError::Error { .. } => {
                self.metrics.incr(Metrics::METRIC_PERSIST_ERROR_COUNT)
            }
        }
    }
}
