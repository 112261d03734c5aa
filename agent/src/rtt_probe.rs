/*
Measures the distance to peers. One measurement sends a fixed number of echo requests
one after another and averages the round trip times they report. A request that gets
no reply still contributes the round trip time the transport reported for it, which is
normally zero, so lost packets pull the average down rather than being ignored.

If the transport fails outright the measurement is abandoned and the peer is recorded
as unreachable. Probing a whole directory runs one task per peer with a limit on how
many are in flight at once.
*/

use std::sync::Arc;

use log::{error, info, warn};
use node_pinger_net::{
    data_types::{AttemptCount, Distance, UNREACHABLE_DISTANCE},
    echo::EchoTransport,
};
use tokio::sync::Semaphore;

use crate::{
    node_record::DistanceUpdates,
    observability::Metrics,
    peer_directory::{PeerAddress, PeerDirectory},
};

pub const DEFAULT_PROBE_ATTEMPTS: AttemptCount = 3;
pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    pub attempts: AttemptCount,
    pub unreachable_distance: Distance,
    pub max_concurrent_probes: usize,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_PROBE_ATTEMPTS,
            unreachable_distance: UNREACHABLE_DISTANCE,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
        }
    }
}

#[derive(Clone)]
pub struct RttProbe {
    transport: Arc<dyn EchoTransport>,
    options: ProbeOptions,
    metrics: Arc<Metrics>,
}

impl RttProbe {
    pub fn new(transport: Arc<dyn EchoTransport>, options: ProbeOptions, metrics: Arc<Metrics>) -> Self {
        let options = ProbeOptions {
            attempts: options.attempts.max(1),
            max_concurrent_probes: options.max_concurrent_probes.max(1),
            ..options
        };
        Self {
            transport,
            options,
            metrics,
        }
    }

    #[rustfmt::skip]
    pub fn options(self: &Self) -> &ProbeOptions { &self.options }

    pub async fn measure(self: &Self, peer: &PeerAddress) -> Distance {
        self.try_measure(peer)
            .await
            .unwrap_or(self.options.unreachable_distance)
    }

    /// None when the transport failed and the peer has to be recorded as unreachable
    async fn try_measure(self: &Self, peer: &PeerAddress) -> Option<Distance> {
        let mut sum: Distance = 0;

        for attempt in 1..=self.options.attempts {
            match self.transport.echo(&peer.address).await {
                Ok(reply) => {
                    self.metrics.incr(Metrics::METRIC_PROBE_ATTEMPT_COUNT);
                    info!(
                        "RttProbe: pinging node: {} address: {} attempt: {attempt} status: {:?} RTT: {}",
                        peer.name, peer.address, reply.status, reply.round_trip_time
                    );
                    sum = sum.saturating_add(reply.round_trip_time);
                }
                Err(e) => {
                    self.metrics.incr(Metrics::METRIC_PROBE_ERROR_COUNT);
                    warn!(
                        "RttProbe: error occured while pinging node: {} address: {} attempt: {attempt}, recording it as unreachable. {e}",
                        peer.name, peer.address
                    );
                    return None;
                }
            }
        }

        Some(sum / Distance::from(self.options.attempts))
    }

    /// Measures every peer in the directory except `self_name`. All measurements have
    /// finished when this returns, and the updates are in directory order.
    pub async fn measure_all(self: &Self, directory: &PeerDirectory, self_name: &str) -> DistanceUpdates {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_probes));

        let tasks: Vec<_> = directory
            .iter()
            .filter(|peer| peer.name != self_name)
            .map(|peer| {
                let probe = self.clone();
                let peer = peer.clone();
                let semaphore = semaphore.clone();
                let name = peer.name.clone();
                let task = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    probe.try_measure(&peer).await
                });
                (name, task)
            })
            .collect();

        let mut updates = DistanceUpdates::new();
        for (name, task) in tasks {
            match task.await {
                Ok(Some(distance)) => updates.push(&name, distance),
                Ok(None) => updates.push_unreachable(&name, self.options.unreachable_distance),
                Err(e) => {
                    error!("RttProbe: probe task for node {name} did not complete. {e}");
                    updates.push_unreachable(&name, self.options.unreachable_distance);
                }
            }
        }
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use node_pinger_net::echo::{EchoError, EchoReply, EchoResult};
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    // Replies with the scripted results in order, then repeats the last one
    struct ScriptedTransport {
        replies: Mutex<Vec<EchoResult>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<EchoResult>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies) })
        }
    }

    #[async_trait]
    impl EchoTransport for ScriptedTransport {
        async fn echo(self: &Self, _address: &str) -> EchoResult {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies[0].clone()
            }
        }
    }

    // Records how many echoes are in progress at the same time
    struct SlowTransport {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl EchoTransport for SlowTransport {
        async fn echo(self: &Self, _address: &str) -> EchoResult {
            let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(EchoReply::success(1))
        }
    }

    // Panics for one address, as a buggy transport would
    struct PanickingTransport {
        address: String,
    }

    #[async_trait]
    impl EchoTransport for PanickingTransport {
        async fn echo(self: &Self, address: &str) -> EchoResult {
            if address == self.address {
                panic!("echo to {address} blew up");
            }
            Ok(EchoReply::success(6))
        }
    }

    fn directory_of(count: usize) -> PeerDirectory {
        let nodes: Vec<crate::cluster_state::NodeResource> = (1..=count)
            .map(|i| {
                crate::cluster_state::NodeResource::new(&format!("node-{i}"), &[format!("10.0.0.{i}").as_str()])
            })
            .collect();
        PeerDirectory::from_nodes(&nodes)
    }

    fn peer() -> PeerAddress {
        PeerAddress {
            name: "node-b".to_owned(),
            address: "10.0.0.2".to_owned(),
        }
    }

    fn probe(transport: Arc<ScriptedTransport>) -> RttProbe {
        RttProbe::new(transport, ProbeOptions::default(), Arc::new(Metrics::disabled()))
    }

    #[tokio::test]
    pub async fn should_average_round_trip_times() {
        let probe = probe(ScriptedTransport::new(vec![
            Ok(EchoReply::success(10)),
            Ok(EchoReply::success(20)),
            Ok(EchoReply::success(30)),
        ]));

        assert_eq!(20, probe.measure(&peer()).await);
    }

    #[tokio::test]
    pub async fn should_truncate_average() {
        let probe = probe(ScriptedTransport::new(vec![
            Ok(EchoReply::success(1)),
            Ok(EchoReply::success(1)),
            Ok(EchoReply::success(2)),
        ]));

        assert_eq!(1, probe.measure(&peer()).await);
    }

    #[tokio::test]
    pub async fn should_include_failed_attempts_in_average() {
        let probe = probe(ScriptedTransport::new(vec![
            Ok(EchoReply::success(30)),
            Ok(EchoReply::failed(0)),
            Ok(EchoReply::success(30)),
        ]));

        assert_eq!(20, probe.measure(&peer()).await);
    }

    #[tokio::test]
    pub async fn should_return_sentinel_when_transport_fails() {
        let probe = probe(ScriptedTransport::new(vec![Err(EchoError::Transport {
            msg: "unknown host".to_owned(),
        })]));

        assert_eq!(UNREACHABLE_DISTANCE, probe.measure(&peer()).await);
    }

    #[tokio::test]
    pub async fn should_discard_partial_data_when_transport_fails() {
        let probe = probe(ScriptedTransport::new(vec![
            Ok(EchoReply::success(10)),
            Ok(EchoReply::success(10)),
            Err(EchoError::Transport { msg: "network is unreachable".to_owned() }),
        ]));

        assert_eq!(UNREACHABLE_DISTANCE, probe.measure(&peer()).await);
    }

    #[tokio::test]
    pub async fn should_count_attempts_and_errors() {
        let metrics = Arc::new(Metrics::disabled());
        let transport = ScriptedTransport::new(vec![
            Ok(EchoReply::success(5)),
            Err(EchoError::InvalidAddress { address: "10.0.0.2".to_owned() }),
        ]);
        let probe = RttProbe::new(transport, ProbeOptions::default(), metrics.clone());

        probe.measure(&peer()).await;

        assert_eq!(1.0, metrics.total(Metrics::METRIC_PROBE_ATTEMPT_COUNT));
        assert_eq!(1.0, metrics.total(Metrics::METRIC_PROBE_ERROR_COUNT));
    }

    #[tokio::test]
    pub async fn should_skip_self_when_measuring_directory() {
        let probe = probe(ScriptedTransport::new(vec![Ok(EchoReply::success(4))]));
        let directory = PeerDirectory::from_nodes(&[
            crate::cluster_state::NodeResource::new("node-a", &["10.0.0.1"]),
            crate::cluster_state::NodeResource::new("node-b", &["10.0.0.2"]),
            crate::cluster_state::NodeResource::new("node-c", &["10.0.0.3"]),
        ]);

        let updates = probe.measure_all(&directory, "node-a").await;

        let measured: Vec<(&str, Distance)> = updates.iter().collect();
        assert_eq!(vec![("node-b", 4), ("node-c", 4)], measured);
    }

    #[tokio::test]
    pub async fn should_clamp_invalid_options() {
        let options = ProbeOptions {
            attempts: 0,
            unreachable_distance: 5,
            max_concurrent_probes: 0,
        };
        let probe = RttProbe::new(
            ScriptedTransport::new(vec![Ok(EchoReply::success(8))]),
            options,
            Arc::new(Metrics::disabled()),
        );

        assert_eq!(1, probe.options().attempts);
        assert_eq!(1, probe.options().max_concurrent_probes);
        assert_eq!(8, probe.measure(&peer()).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    pub async fn should_limit_probes_in_flight() {
        let transport = Arc::new(SlowTransport {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let options = ProbeOptions {
            attempts: 1,
            max_concurrent_probes: 3,
            ..ProbeOptions::default()
        };
        let probe = RttProbe::new(transport.clone(), options, Arc::new(Metrics::disabled()));

        let updates = probe.measure_all(&directory_of(10), "node-0").await;

        assert_eq!(10, updates.len());
        let max_in_flight = transport.max_in_flight.load(Ordering::SeqCst);
        assert!(max_in_flight <= 3, "{max_in_flight} probes ran at once");
        assert!(max_in_flight > 1, "probes ran one at a time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    pub async fn should_record_panicked_probe_as_unreachable() {
        let transport = Arc::new(PanickingTransport {
            address: "10.0.0.2".to_owned(),
        });
        let probe = RttProbe::new(transport, ProbeOptions::default(), Arc::new(Metrics::disabled()));

        let updates = probe.measure_all(&directory_of(3), "node-0").await;

        let measured: Vec<(&str, Distance)> = updates.iter().collect();
        assert_eq!(
            vec![("node-1", 6), ("node-2", UNREACHABLE_DISTANCE), ("node-3", 6)],
            measured
        );
        assert_eq!(1, updates.unreachable_count());
    }
}
