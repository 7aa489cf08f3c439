//! Background scheduler: two independent periodic drivers.
//!
//! The publish driver pushes due content; the renewal driver keeps external
//! subscriptions alive. Each driver holds its own run lock, so a manual
//! check and a timer wake never overlap. Starting is idempotent per
//! `Scheduler` instance.

pub mod model;
pub mod publish;
pub mod renewal;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{DatabaseError, TransportError};

pub use model::{ContentItem, ExternalSubscription, PublishReport, RenewalReport};
pub use publish::PublishDriver;
pub use renewal::RenewalDriver;

/// Default publish driver interval.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(60);

/// Default renewal driver interval.
pub const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Run a collaborator call on its own task so a panic becomes a per-item
/// failure instead of taking the driver down.
pub(crate) async fn isolated<T, F>(call: F) -> Result<T, TransportError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, TransportError>> + Send + 'static,
{
    match tokio::spawn(call).await {
        Ok(result) => result,
        Err(e) => Err(TransportError::Panicked(e.to_string())),
    }
}

pub struct Scheduler {
    publish: Option<Arc<PublishDriver>>,
    renewal: Option<Arc<RenewalDriver>>,
    publish_interval: Duration,
    renewal_interval: Duration,
    started: AtomicBool,
    cancel: CancellationToken,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// A driver left as `None` has no collaborator configured; its checks
    /// report nothing processed and it is never started.
    pub fn new(publish: Option<PublishDriver>, renewal: Option<RenewalDriver>) -> Self {
        Self {
            publish: publish.map(Arc::new),
            renewal: renewal.map(Arc::new),
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            renewal_interval: DEFAULT_RENEWAL_INTERVAL,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_intervals(mut self, publish: Duration, renewal: Duration) -> Self {
        self.publish_interval = publish;
        self.renewal_interval = renewal;
        self
    }

    /// Run one publish wake now.
    pub async fn run_publish_check(&self) -> Result<PublishReport, DatabaseError> {
        match &self.publish {
            Some(driver) => driver.run().await,
            None => {
                debug!("No content publisher configured, skipping publish check");
                Ok(PublishReport::default())
            }
        }
    }

    /// Run one renewal wake now.
    pub async fn run_renewal_check(&self) -> Result<RenewalReport, DatabaseError> {
        match &self.renewal {
            Some(driver) => driver.run().await,
            None => {
                debug!("No subscription renewer configured, skipping renewal check");
                Ok(RenewalReport::default())
            }
        }
    }

    /// Spawn the periodic drivers. Returns `false` if they were already
    /// started; a second call is a no-op.
    pub fn start_background_drivers(&self) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Scheduler drivers already started");
            return false;
        }

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(driver) = &self.publish {
            let driver = Arc::clone(driver);
            handles.push(spawn_driver(
                "publish",
                self.publish_interval,
                self.cancel.clone(),
                move || {
                    let driver = Arc::clone(&driver);
                    async move { driver.run().await.map(|r| r.processed()) }
                },
            ));
        }
        if let Some(driver) = &self.renewal {
            let driver = Arc::clone(driver);
            handles.push(spawn_driver(
                "renewal",
                self.renewal_interval,
                self.cancel.clone(),
                move || {
                    let driver = Arc::clone(&driver);
                    async move { driver.run().await.map(|r| r.processed()) }
                },
            ));
        }

        info!(drivers = handles.len(), "Scheduler drivers started");
        true
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Stop scheduling new wakes and wait for in-flight wakes to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler driver task failed");
            }
        }
        info!("Scheduler stopped");
    }
}

/// Periodic loop for one driver. The first tick is skipped; a wake that is
/// already running finishes before cancellation is observed.
fn spawn_driver<F, Fut>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    mut wake: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<usize, DatabaseError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match wake().await {
                        Ok(processed) => debug!(driver = name, processed, "Driver wake finished"),
                        Err(e) => error!(driver = name, error = %e, "Driver wake failed"),
                    }
                }
            }
        }
        info!(driver = name, "Driver stopped");
    })
}
