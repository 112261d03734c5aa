/// Reading and replacing node and pod records in the cluster's shared state
pub mod cluster_state;

/// The node's own record and the distance labels on it
pub mod node_record;

/// Counters that are sent to statsd at the end of every cycle
pub mod observability;

/// The nodes to probe and the address to probe each one on
pub mod peer_directory;

/// One full pass of discovery, probing and persistence
pub mod reconciler;

/// Measures round trip times to peers
pub mod rtt_probe;

/// Runs the reconciler on a fixed interval until shutdown
pub mod scheduler;

pub mod settings;
