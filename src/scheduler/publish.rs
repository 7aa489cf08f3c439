//! Publish driver: pushes due content to the external publisher.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::channels::ContentPublisher;
use crate::error::DatabaseError;
use crate::events::{Event, EventBus, EventType};
use crate::scheduler::isolated;
use crate::scheduler::model::{ContentItem, PublishReport};
use crate::store::traits::ContentStore;

pub struct PublishDriver {
    content: Arc<dyn ContentStore>,
    publisher: Arc<dyn ContentPublisher>,
    bus: EventBus,
    /// Held for the whole wake so runs never overlap.
    run_lock: Mutex<()>,
}

impl PublishDriver {
    pub fn new(
        content: Arc<dyn ContentStore>,
        publisher: Arc<dyn ContentPublisher>,
        bus: EventBus,
    ) -> Self {
        Self {
            content,
            publisher,
            bus,
            run_lock: Mutex::new(()),
        }
    }

    /// Publish every due, unpublished item.
    ///
    /// A failing item is released for the next wake and counted; it never
    /// stops the rest of the batch. Only failing to list due items is an
    /// error.
    pub async fn run(&self) -> Result<PublishReport, DatabaseError> {
        let _running = self.run_lock.lock().await;

        let due = self.content.list_due_content(Utc::now()).await?;
        if due.is_empty() {
            debug!("Publish check: nothing due");
            return Ok(PublishReport::default());
        }
        info!(due = due.len(), "Publish check: processing due content");

        let mut report = PublishReport::default();
        for item in due {
            match self.publish_one(&item).await {
                Some(true) => report.published += 1,
                Some(false) => report.failed += 1,
                None => {}
            }
        }

        info!(
            published = report.published,
            failed = report.failed,
            "Publish check complete"
        );
        if report.processed() > 0 {
            self.bus.publish(
                Event::new(EventType::JobCompleted)
                    .with_payload(json!({ "job": "publish", "report": report })),
            );
        }
        Ok(report)
    }

    /// Returns `None` when the item was skipped, otherwise whether it was
    /// published.
    async fn publish_one(&self, item: &ContentItem) -> Option<bool> {
        match self.content.claim_content(item.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(content_id = %item.id, "Content already claimed, skipping");
                return None;
            }
            Err(e) => {
                error!(content_id = %item.id, error = %e, "Failed to claim content");
                return Some(false);
            }
        }

        let publisher = Arc::clone(&self.publisher);
        let media_ref = item.media_ref.clone();
        let caption = item.caption.clone();
        let outcome =
            isolated(async move { publisher.publish(&media_ref, &caption).await }).await;

        match outcome {
            Ok(receipt) => {
                if let Err(e) = self
                    .content
                    .mark_content_published(item.id, &receipt.external_id, Utc::now())
                    .await
                {
                    // Still claimed, so it will not be published twice.
                    warn!(content_id = %item.id, error = %e, "Published but failed to record result");
                }
                info!(content_id = %item.id, external_id = %receipt.external_id, "Content published");
                self.bus.publish(Event::new(EventType::MessageSent).with_payload(json!({
                    "source": "scheduler",
                    "contentId": item.id,
                    "externalId": receipt.external_id,
                })));
                Some(true)
            }
            Err(e) => {
                error!(content_id = %item.id, error = %e, "Content publish failed");
                if let Err(release_err) = self.content.release_content(item.id, &e.to_string()).await
                {
                    error!(
                        content_id = %item.id,
                        error = %release_err,
                        "Failed to release content after publish failure"
                    );
                }
                Some(false)
            }
        }
    }
}
