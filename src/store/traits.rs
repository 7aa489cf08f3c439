//! Persistence seams for the conversation core.
//!
//! Each concern gets its own async trait so components depend only on what
//! they touch; `LibSqlBackend` implements all of them and `Database` bundles
//! them for wiring.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::contacts::model::{Channel, Contact};
use crate::error::DatabaseError;
use crate::scheduler::model::{ContentItem, ExternalSubscription};
use crate::threads::model::Message;

/// Contact record accessor.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Insert a new contact. Fails with `Constraint` if `(channel, handle)`
    /// is already taken.
    async fn insert_contact(&self, contact: &Contact) -> Result<(), DatabaseError>;

    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, DatabaseError>;

    async fn find_contact_by_handle(
        &self,
        channel: Channel,
        handle: &str,
    ) -> Result<Option<Contact>, DatabaseError>;

    /// Overwrite the stored contact. Fails with `NotFound` if it is missing.
    async fn update_contact(&self, contact: &Contact) -> Result<(), DatabaseError>;

    /// All contacts, optionally restricted to one channel, most recently
    /// active first.
    async fn list_contacts(&self, channel: Option<Channel>) -> Result<Vec<Contact>, DatabaseError>;
}

/// Message thread storage. One thread per contact.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Return the contact's thread id, creating the thread if absent.
    async fn ensure_thread(&self, contact_id: Uuid) -> Result<Uuid, DatabaseError>;

    async fn insert_thread_message(
        &self,
        thread_id: Uuid,
        message: &Message,
    ) -> Result<(), DatabaseError>;

    /// Messages for a contact in insertion order. Empty if no thread exists.
    async fn list_thread_messages(&self, contact_id: Uuid) -> Result<Vec<Message>, DatabaseError>;

    /// Remove the contact's thread. Returns how many messages were removed.
    async fn delete_thread(&self, contact_id: Uuid) -> Result<usize, DatabaseError>;
}

/// Scheduled content records for the publish driver.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn insert_content(&self, item: &ContentItem) -> Result<(), DatabaseError>;

    async fn get_content(&self, id: Uuid) -> Result<Option<ContentItem>, DatabaseError>;

    /// Unpublished items scheduled at or before `now`, oldest first.
    async fn list_due_content(&self, now: DateTime<Utc>) -> Result<Vec<ContentItem>, DatabaseError>;

    /// Mark an item as published before calling out. Returns `false` if it
    /// was already claimed.
    async fn claim_content(&self, id: Uuid) -> Result<bool, DatabaseError>;

    async fn mark_content_published(
        &self,
        id: Uuid,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Put a claimed item back to not-published and record the failure.
    async fn release_content(&self, id: Uuid, error: &str) -> Result<(), DatabaseError>;
}

/// External subscription records for the renewal driver.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert_subscription(&self, sub: &ExternalSubscription) -> Result<(), DatabaseError>;

    async fn get_subscription(&self, id: Uuid)
    -> Result<Option<ExternalSubscription>, DatabaseError>;

    /// Subscriptions with no expiration or one before `threshold`.
    async fn list_subscriptions_due(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<ExternalSubscription>, DatabaseError>;

    async fn record_renewal(
        &self,
        id: Uuid,
        new_expiration: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    async fn record_renewal_failure(&self, id: Uuid, error: &str) -> Result<(), DatabaseError>;
}

/// Backend-agnostic database covering every store.
#[async_trait]
pub trait Database: ContactStore + ThreadStore + ContentStore + SubscriptionStore {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}
