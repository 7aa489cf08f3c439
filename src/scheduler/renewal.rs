//! Renewal driver: keeps external subscriptions from lapsing.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::channels::SubscriptionRenewer;
use crate::error::DatabaseError;
use crate::events::{Event, EventBus, EventType};
use crate::scheduler::isolated;
use crate::scheduler::model::{ExternalSubscription, RenewalReport};
use crate::store::traits::SubscriptionStore;

/// Subscriptions expiring within this many days are renewed.
pub const DEFAULT_RENEWAL_THRESHOLD_DAYS: i64 = 2;

/// Days of lifetime granted by a successful renewal.
pub const DEFAULT_RENEWAL_PERIOD_DAYS: i64 = 7;

pub struct RenewalDriver {
    subscriptions: Arc<dyn SubscriptionStore>,
    renewer: Arc<dyn SubscriptionRenewer>,
    bus: EventBus,
    threshold: Duration,
    period: Duration,
    run_lock: Mutex<()>,
}

impl RenewalDriver {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        renewer: Arc<dyn SubscriptionRenewer>,
        bus: EventBus,
    ) -> Self {
        Self {
            subscriptions,
            renewer,
            bus,
            threshold: Duration::days(DEFAULT_RENEWAL_THRESHOLD_DAYS),
            period: Duration::days(DEFAULT_RENEWAL_PERIOD_DAYS),
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_window(mut self, threshold: Duration, period: Duration) -> Self {
        self.threshold = threshold;
        self.period = period;
        self
    }

    /// Renew every subscription with no expiration or one inside the
    /// threshold. Per-subscription failures are counted, never returned.
    pub async fn run(&self) -> Result<RenewalReport, DatabaseError> {
        let _running = self.run_lock.lock().await;

        let threshold = Utc::now() + self.threshold;
        let due = self.subscriptions.list_subscriptions_due(threshold).await?;
        if due.is_empty() {
            debug!("Renewal check: nothing due");
            return Ok(RenewalReport::default());
        }
        info!(due = due.len(), "Renewal check: processing subscriptions");

        let mut report = RenewalReport::default();
        for sub in &due {
            if self.renew_one(sub).await {
                report.renewed += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(renewed = report.renewed, failed = report.failed, "Renewal check complete");
        if report.processed() > 0 {
            self.bus.publish(
                Event::new(EventType::JobCompleted)
                    .with_payload(json!({ "job": "renewal", "report": report })),
            );
        }
        Ok(report)
    }

    async fn renew_one(&self, sub: &ExternalSubscription) -> bool {
        let renewer = Arc::clone(&self.renewer);
        let owner_id = sub.owner_id.clone();
        let outcome = isolated(async move { renewer.renew(&owner_id).await }).await;

        let failure = match outcome {
            Ok(true) => {
                let now = Utc::now();
                let expires = now + self.period;
                if let Err(e) = self.subscriptions.record_renewal(sub.id, expires, now).await {
                    warn!(subscription_id = %sub.id, error = %e, "Renewed but failed to record new expiration");
                }
                info!(subscription_id = %sub.id, owner_id = %sub.owner_id, %expires, "Subscription renewed");
                return true;
            }
            Ok(false) => "renewal declined".to_string(),
            Err(e) => e.to_string(),
        };

        error!(subscription_id = %sub.id, owner_id = %sub.owner_id, error = %failure, "Subscription renewal failed");
        if let Err(e) = self
            .subscriptions
            .record_renewal_failure(sub.id, &failure)
            .await
        {
            warn!(subscription_id = %sub.id, error = %e, "Failed to record renewal failure");
        }
        false
    }
}
