use log::{debug, warn};
use statsd::Client;
use std::{collections::HashMap, sync::Mutex};

/// Counts what happens during a cycle and sends the counts to statsd when the cycle
/// ends. Totals since start-up are kept so that they can be inspected without a statsd
/// server.
pub struct Metrics {
    client: Option<Mutex<Client>>,
    counts: Mutex<HashMap<String, f64>>,
    totals: Mutex<HashMap<String, f64>>,
}

impl Metrics {
    pub const METRIC_CYCLE_COUNT: &str = "cycle.count";
    pub const METRIC_CYCLE_DURATION_MS: &str = "cycle.duration.ms";
    pub const METRIC_IDENTITY_ERROR_COUNT: &str = "identity.error.count";
    pub const METRIC_DISCOVERY_ERROR_COUNT: &str = "discovery.error.count";

    pub const METRIC_PROBE_ATTEMPT_COUNT: &str = "probe.attempt.count";
    pub const METRIC_PROBE_ERROR_COUNT: &str = "probe.error.count";

    pub const METRIC_PERSIST_CONFLICT_COUNT: &str = "persist.conflict.count";
    pub const METRIC_PERSIST_RETRY_COUNT: &str = "persist.retry.count";
    pub const METRIC_PERSIST_ERROR_COUNT: &str = "persist.error.count";

    const PREFIX: &str = "node_pinger";

    /// An empty endpoint disables sending to statsd
    pub fn new(endpoint: &str) -> Self {
        let client = if endpoint.is_empty() {
            None
        } else {
            match Client::new(endpoint, Self::PREFIX) {
                Ok(client) => Some(Mutex::new(client)),
                Err(e) => {
                    warn!("Metrics: statsd endpoint {endpoint} is unusable, metrics will not be sent. {e:?}");
                    None
                }
            }
        };

        Self {
            client,
            counts: Mutex::new(HashMap::with_capacity(16)),
            totals: Mutex::new(HashMap::with_capacity(16)),
        }
    }

    pub fn disabled() -> Self {
        Self::new("")
    }

    pub fn incr(self: &Self, metric: &str) {
        self.count(metric, 1.0);
    }

    pub fn count(self: &Self, metric: &str, count: f64) {
        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(String::from(metric)).or_insert(0.0) += count;
        }
    }

    /// Total of everything counted for this metric since start-up, including counts
    /// that have not been flushed yet
    pub fn total(self: &Self, metric: &str) -> f64 {
        let flushed = match self.totals.lock() {
            Ok(totals) => totals.get(metric).copied().unwrap_or(0.0),
            Err(_) => 0.0,
        };
        let pending = match self.counts.lock() {
            Ok(counts) => counts.get(metric).copied().unwrap_or(0.0),
            Err(_) => 0.0,
        };
        flushed + pending
    }

    pub fn flush(self: &Self) {
        let mut counts = match self.counts.lock() {
            Ok(counts) => counts,
            Err(_) => return,
        };
        if counts.is_empty() {
            return;
        }

        if let Some(client) = &self.client {
            if let Ok(client) = client.lock() {
                let mut pipeline = client.pipeline();
                for (metric, count) in counts.iter() {
                    pipeline.count(metric, *count);
                }
                pipeline.send(&client);
            }
        } else {
            debug!("Metrics: {} counters recorded this cycle", counts.len());
        }

        if let Ok(mut totals) = self.totals.lock() {
            for (metric, count) in counts.iter() {
                *totals.entry(metric.clone()).or_insert(0.0) += *count;
            }
        }
        counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn should_keep_totals_across_flushes() {
        let metrics = Metrics::disabled();

        metrics.incr(Metrics::METRIC_PROBE_ATTEMPT_COUNT);
        metrics.incr(Metrics::METRIC_PROBE_ATTEMPT_COUNT);
        assert_eq!(2.0, metrics.total(Metrics::METRIC_PROBE_ATTEMPT_COUNT));

        metrics.flush();
        metrics.count(Metrics::METRIC_PROBE_ATTEMPT_COUNT, 3.0);
        assert_eq!(5.0, metrics.total(Metrics::METRIC_PROBE_ATTEMPT_COUNT));
        assert_eq!(0.0, metrics.total(Metrics::METRIC_PROBE_ERROR_COUNT));
    }

    #[test]
    pub fn should_flush_to_statsd_endpoint() {
        let metrics = Metrics::new("127.0.0.1:8125");

        metrics.incr(Metrics::METRIC_CYCLE_COUNT);
        metrics.flush();

        assert_eq!(1.0, metrics.total(Metrics::METRIC_CYCLE_COUNT));
    }
}
