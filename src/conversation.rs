//! Conversation service: the inbound and outbound message paths.
//!
//! Ties channel transports to the thread store. Inbound messages find or
//! create their contact; outbound text is sent through the contact's
//! channel transport and recorded as a system message only after the
//! provider accepts it.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channels::TransportRegistry;
use crate::contacts::model::{Channel, Contact};
use crate::error::{ConversationError, DatabaseError};
use crate::events::{Event, EventBus, EventType};
use crate::store::traits::ContactStore;
use crate::threads::model::{AppendedMessage, NewMessage};
use crate::threads::store::MessageThreadStore;

/// Result of ingesting an inbound message.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingested {
    pub contact: Contact,
    pub created: bool,
    pub appended: AppendedMessage,
}

pub struct ConversationService {
    contacts: Arc<dyn ContactStore>,
    threads: Arc<MessageThreadStore>,
    transports: TransportRegistry,
    bus: EventBus,
}

impl ConversationService {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        threads: Arc<MessageThreadStore>,
        transports: TransportRegistry,
        bus: EventBus,
    ) -> Self {
        Self {
            contacts,
            threads,
            transports,
            bus,
        }
    }

    /// Record a message received from `handle` on `channel`, creating the
    /// contact on first contact.
    pub async fn ingest_inbound(
        &self,
        channel: Channel,
        handle: &str,
        display_name: Option<&str>,
        mut message: NewMessage,
    ) -> Result<Ingested, ConversationError> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Err(ConversationError::Validation(
                "channel handle is required".into(),
            ));
        }

        // Checked before the contact exists so a rejected first message
        // leaves nothing behind.
        message.validate()?;

        let (contact, created) = self.find_or_create(channel, handle, display_name).await?;
        message.sender_tag = contact.id.to_string();
        let appended = self.threads.append_message(contact.id, message).await?;

        // Reload so the caller sees the refreshed cache.
        let contact = self.contacts.get_contact(contact.id).await?.unwrap_or(contact);
        Ok(Ingested {
            contact,
            created,
            appended,
        })
    }

    /// Send `text` to the contact over its channel and record it.
    pub async fn send_outbound(
        &self,
        contact_id: Uuid,
        text: &str,
    ) -> Result<AppendedMessage, ConversationError> {
        if text.trim().is_empty() {
            return Err(ConversationError::Validation("text is required".into()));
        }
        let contact = self
            .contacts
            .get_contact(contact_id)
            .await?
            .ok_or(ConversationError::ContactNotFound { id: contact_id })?;

        let transport = self.transports.get(contact.channel)?;
        let receipt = transport.send(&contact.channel_handle, text).await?;
        debug!(contact_id = %contact_id, external_id = %receipt.external_id, "Outbound message accepted");

        self.threads
            .append_message(
                contact_id,
                NewMessage::system(text).with_external_id(receipt.external_id),
            )
            .await
    }

    /// Send a reply produced by the external AI responder and announce it.
    pub async fn record_ai_response(
        &self,
        contact_id: Uuid,
        text: &str,
    ) -> Result<AppendedMessage, ConversationError> {
        let appended = self.send_outbound(contact_id, text).await?;
        let contact = self.contacts.get_contact(contact_id).await?;
        let mut event = Event::new(EventType::AiResponse)
            .with_payload(json!({ "message": &appended.message }));
        if let Some(contact) = contact {
            event = event.for_contact(contact.id, contact.channel_handle);
        }
        self.bus.publish(event);
        Ok(appended)
    }

    async fn find_or_create(
        &self,
        channel: Channel,
        handle: &str,
        display_name: Option<&str>,
    ) -> Result<(Contact, bool), ConversationError> {
        if let Some(existing) = self.contacts.find_contact_by_handle(channel, handle).await? {
            return Ok((existing, false));
        }

        let mut contact = Contact::new(channel, handle);
        if let Some(name) = display_name.map(str::trim).filter(|n| !n.is_empty()) {
            contact.display_name = name.to_string();
        }

        match self.contacts.insert_contact(&contact).await {
            Ok(()) => {
                info!(contact_id = %contact.id, channel = %channel, "New contact created");
                self.bus.publish(
                    Event::new(EventType::ContactUpdated)
                        .for_contact(contact.id, contact.channel_handle.as_str())
                        .with_payload(json!({ "contact": &contact, "change": { "field": "created" } })),
                );
                Ok((contact, true))
            }
            // Lost a creation race; the winner's row is the contact.
            Err(DatabaseError::Constraint(_)) => {
                let existing = self
                    .contacts
                    .find_contact_by_handle(channel, handle)
                    .await?
                    .ok_or_else(|| {
                        ConversationError::Database(DatabaseError::NotFound {
                            entity: "contact".into(),
                            id: format!("{channel}:{handle}"),
                        })
                    })?;
                Ok((existing, false))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::channels::{MessageTransport, SendReceipt};
    use crate::contacts::locks::ContactLocks;
    use crate::error::TransportError;
    use crate::events::Listener;
    use crate::store::LibSqlBackend;

    /// Records sends; fails when the text is "fail".
    struct RecordingTransport {
        channel: Channel,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessageTransport for RecordingTransport {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(&self, handle: &str, text: &str) -> Result<SendReceipt, TransportError> {
            if text == "fail" {
                return Err(TransportError::Rejected {
                    service: "test".into(),
                    status: 400,
                    body: "invalid recipient".into(),
                });
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((handle.to_string(), text.to_string()));
            Ok(SendReceipt {
                external_id: format!("wamid.{}", sent.len()),
            })
        }
    }

    struct Harness {
        db: Arc<LibSqlBackend>,
        service: ConversationService,
        threads: Arc<MessageThreadStore>,
        transport: Arc<RecordingTransport>,
        bus: EventBus,
    }

    async fn harness() -> Harness {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let bus = EventBus::new();
        let threads = Arc::new(MessageThreadStore::new(
            db.clone(),
            db.clone(),
            ContactLocks::new(),
            bus.clone(),
        ));
        let transport = Arc::new(RecordingTransport {
            channel: Channel::Whatsapp,
            sent: Mutex::new(Vec::new()),
        });
        let transports = TransportRegistry::new().with(transport.clone());
        let service = ConversationService::new(db.clone(), threads.clone(), transports, bus.clone());
        Harness {
            db,
            service,
            threads,
            transport,
            bus,
        }
    }

    fn kinds(listener: &mut Listener) -> Vec<EventType> {
        let mut out = Vec::new();
        while let Some(e) = listener.try_recv() {
            out.push(e.kind);
        }
        out
    }

    #[tokio::test]
    async fn first_inbound_creates_contact() {
        let h = harness().await;
        let ingested = h
            .service
            .ingest_inbound(
                Channel::Whatsapp,
                "+15550100",
                Some("Ana"),
                NewMessage::text("hello", "ignored"),
            )
            .await
            .unwrap();

        assert!(ingested.created);
        assert_eq!(ingested.contact.display_name, "Ana");
        assert_eq!(ingested.contact.last_message_text.as_deref(), Some("hello"));
        assert_eq!(
            ingested.appended.message.sender_tag,
            ingested.contact.id.to_string()
        );

        let again = h
            .service
            .ingest_inbound(
                Channel::Whatsapp,
                "+15550100",
                None,
                NewMessage::text("second", ""),
            )
            .await
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.contact.id, ingested.contact.id);
        assert_eq!(h.threads.get_thread(again.contact.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn same_handle_on_other_channel_is_separate() {
        let h = harness().await;
        let wa = h
            .service
            .ingest_inbound(Channel::Whatsapp, "ana", None, NewMessage::text("a", ""))
            .await
            .unwrap();
        let ig = h
            .service
            .ingest_inbound(Channel::Instagram, "ana", None, NewMessage::text("b", ""))
            .await
            .unwrap();
        assert_ne!(wa.contact.id, ig.contact.id);
    }

    #[tokio::test]
    async fn concurrent_first_messages_create_one_contact() {
        let h = harness().await;
        let service = Arc::new(h.service);
        let mut handles = Vec::new();
        for i in 0..5 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .ingest_inbound(
                        Channel::Instagram,
                        "racer",
                        None,
                        NewMessage::text(format!("m{i}"), ""),
                    )
                    .await
                    .unwrap()
                    .contact
                    .id
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(h.db.list_contacts(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_handle_is_rejected() {
        let h = harness().await;
        let err = h
            .service
            .ingest_inbound(Channel::Whatsapp, "  ", None, NewMessage::text("x", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Validation(_)));
    }

    #[tokio::test]
    async fn rejected_first_message_creates_no_contact() {
        let h = harness().await;
        let mut listener = h.bus.subscribe();

        let err = h
            .service
            .ingest_inbound(Channel::Whatsapp, "+1999", None, NewMessage::text("", ""))
            .await
            .unwrap_err();

        assert!(matches!(err, ConversationError::Validation(_)));
        assert!(h
            .db
            .find_contact_by_handle(Channel::Whatsapp, "+1999")
            .await
            .unwrap()
            .is_none());
        assert_eq!(kinds(&mut listener), vec![EventType::Connected]);
    }

    #[tokio::test]
    async fn outbound_is_sent_then_recorded() {
        let h = harness().await;
        let contact = Contact::new(Channel::Whatsapp, "+1");
        h.db.insert_contact(&contact).await.unwrap();

        let appended = h.service.send_outbound(contact.id, "on my way").await.unwrap();
        assert!(appended.message.is_outbound());
        assert_eq!(appended.message.external_id, "wamid.1");
        assert_eq!(
            h.transport.sent.lock().unwrap().as_slice(),
            &[("+1".to_string(), "on my way".to_string())]
        );
    }

    #[tokio::test]
    async fn failed_send_records_nothing() {
        let h = harness().await;
        let contact = Contact::new(Channel::Whatsapp, "+1");
        h.db.insert_contact(&contact).await.unwrap();

        let err = h.service.send_outbound(contact.id, "fail").await.unwrap_err();
        assert!(matches!(err, ConversationError::ExternalTransport(_)));
        assert!(h.threads.get_thread(contact.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_transport_is_external_error() {
        let h = harness().await;
        let contact = Contact::new(Channel::Instagram, "ig");
        h.db.insert_contact(&contact).await.unwrap();

        let err = h.service.send_outbound(contact.id, "hi").await.unwrap_err();
        assert!(matches!(
            err,
            ConversationError::ExternalTransport(TransportError::NotConfigured { .. })
        ));
    }

    #[tokio::test]
    async fn ai_response_is_announced() {
        let h = harness().await;
        let contact = Contact::new(Channel::Whatsapp, "+1");
        h.db.insert_contact(&contact).await.unwrap();
        let mut listener = h.bus.subscribe();

        h.service
            .record_ai_response(contact.id, "Thanks, we'll call you.")
            .await
            .unwrap();

        assert_eq!(
            kinds(&mut listener),
            vec![
                EventType::Connected,
                EventType::MessageSent,
                EventType::ContactUpdated,
                EventType::AiResponse,
            ]
        );
    }

    #[tokio::test]
    async fn send_to_unknown_contact() {
        let h = harness().await;
        let err = h.service.send_outbound(Uuid::new_v4(), "hi").await.unwrap_err();
        assert!(matches!(err, ConversationError::ContactNotFound { .. }));
    }
}
