//! Periodic maintenance loop
//!
//! One task drives the health job and the scrubber on fixed intervals, and
//! reconnects a degraded backend on request. It stops when the scheduler is
//! shut down or dropped.

use std::sync::Arc;
use std::time::Duration;

use chatcache_core::cache::{BackendMode, CacheBackend};
use chatcache_core::config::MaintenanceConfig;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::health::HealthJob;
use super::scrubber::Scrubber;

pub struct MaintenanceScheduler {
    cancel_token: CancellationToken,
    reconnect_requested: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

async fn reconnect(backend: &CacheBackend) {
    match backend.reconnect().await {
        Ok(mode) => info!(%mode, "Cache backend reconnected"),
        Err(e) => warn!(error = %e, "Cache backend reconnect failed"),
    }
}

impl MaintenanceScheduler {
    /// Spawn the maintenance loop
    pub fn start(
        health: HealthJob,
        scrubber: Scrubber,
        backend: Arc<CacheBackend>,
        config: &MaintenanceConfig,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let cancel = cancel_token.clone();
        let reconnect_requested = Arc::new(Notify::new());
        let requested = reconnect_requested.clone();
        let auto_reconnect = config.auto_reconnect;

        let mut health_timer = interval(Duration::from_secs(config.health_interval_seconds.max(1)));
        let mut scrub_timer = interval(Duration::from_secs(config.scrub_interval_seconds.max(1)));

        let handle = tokio::spawn(async move {
            info!("Cache maintenance started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Cache maintenance shutting down");
                        return;
                    }
                    () = requested.notified() => {
                        let mode = backend.mode();
                        if mode == BackendMode::Degraded {
                            info!("Cache backend reconnect requested");
                            reconnect(&backend).await;
                        } else {
                            debug!(%mode, "Reconnect requested but backend is not degraded");
                        }
                    }
                    _ = health_timer.tick() => {
                        let report = health.run().await;
                        if !report.healthy && report.mode == BackendMode::Clustered {
                            backend.force_demote("health check failed");
                        } else if report.check_ok
                            && report.mode == BackendMode::Degraded
                            && auto_reconnect
                        {
                            reconnect(&backend).await;
                        }
                    }
                    _ = scrub_timer.tick() => {
                        if let Err(e) = scrubber.run().await {
                            error!(error = %e, "Cache scrub failed");
                        }
                    }
                }
            }
        });

        Self {
            cancel_token,
            reconnect_requested,
            handle: Some(handle),
        }
    }

    /// Ask the loop to reconnect a degraded backend. Requests made while one
    /// is pending coalesce.
    pub fn request_reconnect(&self) {
        self.reconnect_requested.notify_one();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Cache maintenance task panicked");
            }
        }
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
