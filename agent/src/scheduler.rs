use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use log::info;
use tokio::{sync::Notify, time};

use crate::{peer_directory::PeerDirectory, reconciler::Reconciler};

/// Set from a signal handler to ask the scheduler to stop. A cycle that is already
/// running is allowed to finish.
pub struct ShutdownSignal {
    stop_signal: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            stop_signal: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn trigger(self: &Self) {
        self.stop_signal.store(true, Ordering::Relaxed);
        // notify_one stores a permit, so a scheduler that starts waiting later still wakes
        self.notify.notify_one();
    }

    pub fn is_triggered(self: &Self) -> bool {
        self.stop_signal.load(Ordering::Relaxed)
    }

    pub async fn wait(self: &Self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a cycle, sleeps for `interval`, and repeats until shutdown is signalled.
/// Returns the number of cycles that were run.
pub async fn run(reconciler: &Reconciler, interval: Duration, shutdown: &ShutdownSignal) -> u64 {
    info!("Scheduler: Starting, interval {}s", interval.as_secs());

    let mut directory = PeerDirectory::new();
    let mut cycles: u64 = 0;

    while !shutdown.is_triggered() {
        let report = reconciler.run_cycle(&mut directory).await;
        cycles += 1;
        info!("Scheduler: {report}");

        tokio::select! {
            _ = time::sleep(interval) => {}
            _ = shutdown.wait() => {}
        }
    }

    info!("Scheduler: Stopping after {cycles} cycles");
    cycles
}
