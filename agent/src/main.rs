use std::{env, process, sync::Arc};

use log::{error, info, warn, LevelFilter};

use node_pinger_agent::{
    cluster_state::build_cluster_state,
    observability::Metrics,
    reconciler::Reconciler,
    rtt_probe::RttProbe,
    scheduler::{self, ShutdownSignal},
    settings::{RuntimeIdentity, Settings},
};
use node_pinger_net::system_ping::SystemPing;

#[tokio::main]
async fn main() {
    let mut clog = colog::default_builder();
    clog.filter_level(LevelFilter::Trace);
    clog.init();

    // 1st command line arg is the name of the environment
    let args: Vec<String> = env::args().collect();
    let environment = args.get(1).map(|s| s.as_str()).unwrap_or("dev");

    let settings = match Settings::load(environment) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    #[cfg(debug_assertions)]
    log::set_max_level(LevelFilter::Debug.max(settings.log_level_filter().unwrap_or(LevelFilter::Info)));

    #[cfg(not(debug_assertions))]
    log::set_max_level(settings.log_level_filter().unwrap_or(LevelFilter::Info));

    // Each pod deployment needs MY_POD_NAME and MY_POD_NAMESPACE in its environment
    let identity = match RuntimeIdentity::from_env() {
        Ok(identity) => identity,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let scheme = match settings.cluster_state_scheme() {
        Ok(scheme) => scheme,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    info!(
        "Starting node pinger for pod {}/{} with {:?} cluster state",
        identity.namespace, identity.pod_name, scheme
    );

    let cluster = build_cluster_state(scheme, &settings.state_path());
    let metrics = Arc::new(Metrics::new(&settings.statsd_endpoint));
    let transport = Arc::new(SystemPing::new(settings.ping_timeout()));
    let probe = RttProbe::new(transport, settings.probe_options(), metrics.clone());
    let reconciler = Reconciler::new(cluster, probe, identity, metrics);

    // Handle SIGINT and SIGTERM by asking the scheduler to stop after the current cycle
    let shutdown = Arc::new(ShutdownSignal::new());
    let signal_handle = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || signal_handle.trigger()) {
        warn!("Unable to install the shutdown signal handler. {e}");
    }

    scheduler::run(&reconciler, settings.probe_interval(), &shutdown).await;
}
