//! Message thread store.
//!
//! Owns the one-thread-per-contact rule and the ordering guarantee. An
//! append is a two-step sequence: the message is written to the thread
//! (authoritative), then the contact's last-message cache is refreshed
//! (best-effort). A cache failure after a successful insert is reported as a
//! degraded success, never as an error.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::contacts::locks::ContactLocks;
use crate::contacts::model::Contact;
use crate::error::ConversationError;
use crate::events::{Event, EventBus, EventType};
use crate::store::traits::{ContactStore, ThreadStore};
use crate::threads::model::{AppendedMessage, CacheStatus, Message, NewMessage, sort_thread};

pub struct MessageThreadStore {
    threads: Arc<dyn ThreadStore>,
    contacts: Arc<dyn ContactStore>,
    locks: Arc<ContactLocks>,
    bus: EventBus,
}

impl MessageThreadStore {
    pub fn new(
        threads: Arc<dyn ThreadStore>,
        contacts: Arc<dyn ContactStore>,
        locks: Arc<ContactLocks>,
        bus: EventBus,
    ) -> Self {
        Self {
            threads,
            contacts,
            locks,
            bus,
        }
    }

    /// Append a message to the contact's thread, creating the thread if
    /// needed.
    pub async fn append_message(
        &self,
        contact_id: Uuid,
        new: NewMessage,
    ) -> Result<AppendedMessage, ConversationError> {
        new.validate()?;

        let _guard = self.locks.lock(contact_id).await;

        let mut contact = self
            .contacts
            .get_contact(contact_id)
            .await?
            .ok_or(ConversationError::ContactNotFound { id: contact_id })?;

        let thread_id = self.threads.ensure_thread(contact_id).await?;
        let message = new.into_message(Utc::now());
        self.threads.insert_thread_message(thread_id, &message).await?;

        let cache = self.refresh_cache(&mut contact, &message).await;

        debug!(
            contact_id = %contact_id,
            message_id = %message.id,
            outbound = message.is_outbound(),
            "Message appended"
        );

        let kind = if message.is_outbound() {
            EventType::MessageSent
        } else {
            EventType::NewMessage
        };
        self.bus.publish(
            Event::new(kind)
                .for_contact(contact.id, contact.channel_handle.as_str())
                .with_payload(json!({ "message": &message })),
        );
        if cache == CacheStatus::Updated {
            self.announce_contact(&contact);
        }

        Ok(AppendedMessage { message, cache })
    }

    /// The contact's messages, oldest first. Empty if no thread exists yet.
    pub async fn get_thread(&self, contact_id: Uuid) -> Result<Vec<Message>, ConversationError> {
        let mut messages = self.threads.list_thread_messages(contact_id).await?;
        sort_thread(&mut messages);
        Ok(messages)
    }

    /// Clear the thread and the contact's last-message cache. Returns the
    /// number of removed messages; a missing thread removes 0.
    pub async fn delete_thread(&self, contact_id: Uuid) -> Result<usize, ConversationError> {
        let _guard = self.locks.lock(contact_id).await;

        let removed = self.threads.delete_thread(contact_id).await?;

        let mut contact_changed = None;
        match self.contacts.get_contact(contact_id).await {
            Ok(Some(mut contact)) => {
                if contact.clear_last_message() {
                    contact.updated_at = Utc::now();
                    match self.contacts.update_contact(&contact).await {
                        Ok(()) => contact_changed = Some(contact),
                        Err(e) => {
                            warn!(contact_id = %contact_id, error = %e, "Failed to clear last-message cache");
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(contact_id = %contact_id, error = %e, "Failed to load contact after thread delete");
            }
        }

        if removed > 0 {
            info!(contact_id = %contact_id, removed, "Thread deleted");
        }
        if let Some(contact) = contact_changed {
            self.announce_contact(&contact);
        }
        Ok(removed)
    }

    /// Point the contact's cache at `message` unless it already holds a
    /// newer one.
    async fn refresh_cache(&self, contact: &mut Contact, message: &Message) -> CacheStatus {
        if contact
            .last_message_at
            .is_some_and(|cached| cached > message.timestamp)
        {
            return CacheStatus::Unchanged;
        }

        contact.last_message_text = Some(message.text.clone());
        contact.last_message_at = Some(message.timestamp);
        contact.updated_at = Utc::now();

        match self.contacts.update_contact(contact).await {
            Ok(()) => CacheStatus::Updated,
            Err(e) => {
                warn!(
                    contact_id = %contact.id,
                    message_id = %message.id,
                    error = %e,
                    "Message stored but last-message cache update failed"
                );
                CacheStatus::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn announce_contact(&self, contact: &Contact) {
        self.bus.publish(
            Event::new(EventType::ContactUpdated)
                .for_contact(contact.id, contact.channel_handle.as_str())
                .with_payload(json!({ "contact": contact })),
        );
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};

    use super::*;
    use crate::contacts::model::Channel;
    use crate::error::DatabaseError;
    use crate::events::Listener;
    use crate::store::LibSqlBackend;
    use crate::threads::model::MessageType;

    struct Harness {
        db: Arc<LibSqlBackend>,
        store: MessageThreadStore,
        bus: EventBus,
    }

    async fn harness() -> Harness {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let bus = EventBus::new();
        let store = MessageThreadStore::new(db.clone(), db.clone(), ContactLocks::new(), bus.clone());
        Harness { db, store, bus }
    }

    async fn seed_contact(db: &LibSqlBackend) -> Contact {
        let contact = Contact::new(Channel::Whatsapp, "+15550100");
        db.insert_contact(&contact).await.unwrap();
        contact
    }

    fn drain(listener: &mut Listener) -> Vec<EventType> {
        let mut kinds = Vec::new();
        while let Some(event) = listener.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn older_message_sorts_first() {
        let h = harness().await;
        let c1 = seed_contact(&h.db).await;
        let t1 = Utc::now();
        let t0 = t1 - Duration::minutes(10);

        h.store
            .append_message(c1.id, NewMessage::text("hi", c1.id.to_string()).at(t1))
            .await
            .unwrap();
        h.store
            .append_message(c1.id, NewMessage::text("hey", c1.id.to_string()).at(t0))
            .await
            .unwrap();

        let texts: Vec<String> = h
            .store
            .get_thread(c1.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["hey", "hi"]);
    }

    #[tokio::test]
    async fn equal_timestamps_keep_insertion_order() {
        let h = harness().await;
        let c = seed_contact(&h.db).await;
        let t = Utc::now();
        for text in ["first", "second", "third"] {
            h.store
                .append_message(c.id, NewMessage::text(text, "x").at(t))
                .await
                .unwrap();
        }
        h.store
            .append_message(c.id, NewMessage::text("earliest", "x").at(t - Duration::seconds(1)))
            .await
            .unwrap();

        let texts: Vec<String> = h
            .store
            .get_thread(c.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["earliest", "first", "second", "third"]);
    }

    #[tokio::test]
    async fn get_thread_without_thread_is_empty() {
        let h = harness().await;
        let c = seed_contact(&h.db).await;
        assert!(h.store.get_thread(c.id).await.unwrap().is_empty());
        assert!(h.store.get_thread(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_to_unknown_contact_fails() {
        let h = harness().await;
        let id = Uuid::new_v4();
        let err = h
            .store
            .append_message(id, NewMessage::text("hi", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::ContactNotFound { id: missing } if missing == id));
    }

    #[tokio::test]
    async fn empty_text_is_rejected_for_text_only() {
        let h = harness().await;
        let c = seed_contact(&h.db).await;

        let err = h
            .store
            .append_message(c.id, NewMessage::text("   ", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Validation(_)));

        let mut image = NewMessage::text("", "x");
        image.message_type = MessageType::Image;
        h.store.append_message(c.id, image).await.unwrap();
        assert_eq!(h.store.get_thread(c.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cache_tracks_newest_message() {
        let h = harness().await;
        let c = seed_contact(&h.db).await;
        let t1 = DateTime::from_timestamp_millis(1_700_000_100_000).unwrap();
        let t0 = t1 - Duration::minutes(1);

        let first = h
            .store
            .append_message(c.id, NewMessage::text("newer", "x").at(t1))
            .await
            .unwrap();
        assert_eq!(first.cache, CacheStatus::Updated);

        let second = h
            .store
            .append_message(c.id, NewMessage::text("older", "x").at(t0))
            .await
            .unwrap();
        assert_eq!(second.cache, CacheStatus::Unchanged);

        let contact = h.db.get_contact(c.id).await.unwrap().unwrap();
        assert_eq!(contact.last_message_text.as_deref(), Some("newer"));
        assert_eq!(contact.last_message_at, Some(t1));
    }

    #[tokio::test]
    async fn append_publishes_message_then_contact_events() {
        let h = harness().await;
        let c = seed_contact(&h.db).await;
        let mut listener = h.bus.subscribe();

        h.store
            .append_message(c.id, NewMessage::text("inbound", c.id.to_string()))
            .await
            .unwrap();
        h.store
            .append_message(c.id, NewMessage::system("outbound"))
            .await
            .unwrap();

        assert_eq!(
            drain(&mut listener),
            vec![
                EventType::Connected,
                EventType::NewMessage,
                EventType::ContactUpdated,
                EventType::MessageSent,
                EventType::ContactUpdated,
            ]
        );
    }

    #[tokio::test]
    async fn delete_thread_clears_cache_and_is_idempotent() {
        let h = harness().await;
        let c = seed_contact(&h.db).await;
        for text in ["a", "b", "c"] {
            h.store
                .append_message(c.id, NewMessage::text(text, "x"))
                .await
                .unwrap();
        }

        assert_eq!(h.store.delete_thread(c.id).await.unwrap(), 3);
        assert!(h.store.get_thread(c.id).await.unwrap().is_empty());
        assert_eq!(h.store.delete_thread(c.id).await.unwrap(), 0);

        let contact = h.db.get_contact(c.id).await.unwrap().unwrap();
        assert!(contact.last_message_text.is_none());
        assert!(contact.last_message_at.is_none());

        // A new append after delete starts a fresh thread.
        h.store
            .append_message(c.id, NewMessage::text("again", "x"))
            .await
            .unwrap();
        assert_eq!(h.store.get_thread(c.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_thread_for_unknown_contact_returns_zero() {
        let h = harness().await;
        assert_eq!(h.store.delete_thread(Uuid::new_v4()).await.unwrap(), 0);
    }

    /// Contact store whose updates always fail.
    struct FailingUpdates(Arc<LibSqlBackend>);

    #[async_trait]
    impl ContactStore for FailingUpdates {
        async fn insert_contact(&self, contact: &Contact) -> Result<(), DatabaseError> {
            self.0.insert_contact(contact).await
        }
        async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, DatabaseError> {
            self.0.get_contact(id).await
        }
        async fn find_contact_by_handle(
            &self,
            channel: Channel,
            handle: &str,
        ) -> Result<Option<Contact>, DatabaseError> {
            self.0.find_contact_by_handle(channel, handle).await
        }
        async fn update_contact(&self, _contact: &Contact) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("disk full".into()))
        }
        async fn list_contacts(
            &self,
            channel: Option<Channel>,
        ) -> Result<Vec<Contact>, DatabaseError> {
            self.0.list_contacts(channel).await
        }
    }

    #[tokio::test]
    async fn cache_failure_is_degraded_success() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let c = seed_contact(&db).await;
        let bus = EventBus::new();
        let store = MessageThreadStore::new(
            db.clone(),
            Arc::new(FailingUpdates(db.clone())),
            ContactLocks::new(),
            bus.clone(),
        );
        let mut listener = bus.subscribe();

        let appended = store
            .append_message(c.id, NewMessage::text("hi", "x"))
            .await
            .unwrap();
        assert!(appended.is_degraded());
        assert_eq!(store.get_thread(c.id).await.unwrap().len(), 1);

        // The message event still goes out; no contact update is announced.
        assert_eq!(
            drain(&mut listener),
            vec![EventType::Connected, EventType::NewMessage]
        );
    }

    #[tokio::test]
    async fn concurrent_appends_stay_ordered() {
        let h = harness().await;
        let c = seed_contact(&h.db).await;
        let store = Arc::new(h.store);
        let base = Utc::now();

        let mut handles = Vec::new();
        for i in 0..20i64 {
            let store = store.clone();
            let id = c.id;
            handles.push(tokio::spawn(async move {
                let ts = base + Duration::milliseconds((i * 7) % 11);
                store
                    .append_message(id, NewMessage::text(format!("m{i}"), "x").at(ts))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let thread = store.get_thread(c.id).await.unwrap();
        assert_eq!(thread.len(), 20);
        assert!(thread.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let contact = h.db.get_contact(c.id).await.unwrap().unwrap();
        let newest = thread.last().unwrap().timestamp;
        assert_eq!(contact.last_message_at, Some(newest));
    }
}
