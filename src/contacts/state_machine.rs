//! Contact state machine.
//!
//! Status transitions are whitelisted, not computed: any enumerated status
//! may follow any other, and the only job here is validating membership.
//! Monotonic flags are the one hard rule; once true they stay true.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::contacts::locks::ContactLocks;
use crate::contacts::model::{Contact, ContactPatch, ContactStatus, ConversationFlag};
use crate::error::ConversationError;
use crate::events::{Event, EventBus, EventType};
use crate::store::traits::ContactStore;

pub struct ContactStateMachine {
    contacts: Arc<dyn ContactStore>,
    locks: Arc<ContactLocks>,
    bus: EventBus,
}

impl ContactStateMachine {
    pub fn new(contacts: Arc<dyn ContactStore>, locks: Arc<ContactLocks>, bus: EventBus) -> Self {
        Self {
            contacts,
            locks,
            bus,
        }
    }

    /// Move the contact to `status`.
    ///
    /// A blank request is a successful no-op. Reaching a terminal status also
    /// marks the initial qualification flow as completed.
    pub async fn set_status(&self, contact_id: Uuid, status: &str) -> Result<(), ConversationError> {
        let requested = status.trim();
        if requested.is_empty() {
            debug!(contact_id = %contact_id, "Blank status request ignored");
            return Ok(());
        }
        let status: ContactStatus = requested.parse()?;

        let _guard = self.locks.lock(contact_id).await;
        let mut contact = self.load(contact_id).await?;

        let previous = contact.status;
        let mut changed = previous != status;
        contact.status = status;
        if status.is_terminal() && !contact.initial_flow_completed {
            contact.initial_flow_completed = true;
            changed = true;
        }
        if !changed {
            return Ok(());
        }

        self.save(&mut contact).await?;
        info!(contact_id = %contact_id, from = %previous, to = %status, "Contact status changed");
        self.announce(&contact, json!({ "field": "status", "from": previous, "to": status }));
        Ok(())
    }

    /// Set a conversation flag.
    ///
    /// Resetting a monotonic flag that is already true fails with
    /// `IllegalFlagReset` and leaves it true. Re-settable flags accept any
    /// value.
    pub async fn set_flag(
        &self,
        contact_id: Uuid,
        flag: ConversationFlag,
        value: bool,
    ) -> Result<(), ConversationError> {
        let _guard = self.locks.lock(contact_id).await;
        let mut contact = self.load(contact_id).await?;

        let current = contact.flags.get(flag);
        if flag.is_monotonic() && current && !value {
            warn!(contact_id = %contact_id, flag = %flag, "Rejected reset of monotonic flag");
            return Err(ConversationError::IllegalFlagReset {
                flag: flag.to_string(),
            });
        }
        if current == value {
            return Ok(());
        }

        contact.flags.set(flag, value);
        self.save(&mut contact).await?;
        debug!(contact_id = %contact_id, flag = %flag, value, "Conversation flag set");
        self.announce(&contact, json!({ "field": "flags", "flag": flag, "value": value }));
        Ok(())
    }

    /// Bump the analytics counter for `status`.
    ///
    /// Counters are best-effort telemetry: an unknown status is logged and
    /// ignored.
    pub async fn increment_status_counter(
        &self,
        contact_id: Uuid,
        status: &str,
    ) -> Result<(), ConversationError> {
        let Ok(status) = status.trim().parse::<ContactStatus>() else {
            warn!(contact_id = %contact_id, status, "Unknown status counter, ignoring");
            return Ok(());
        };

        let _guard = self.locks.lock(contact_id).await;
        let mut contact = self.load(contact_id).await?;

        let counter = contact.status_counters.counter_mut(status);
        *counter = counter.saturating_add(1);
        let count = *counter;

        self.save(&mut contact).await?;
        debug!(contact_id = %contact_id, status = %status, count, "Status counter incremented");
        Ok(())
    }

    /// Update profile fields. Returns the stored contact.
    pub async fn apply_patch(
        &self,
        contact_id: Uuid,
        patch: ContactPatch,
    ) -> Result<Contact, ConversationError> {
        let _guard = self.locks.lock(contact_id).await;
        let mut contact = self.load(contact_id).await?;

        if patch.apply(&mut contact) {
            self.save(&mut contact).await?;
            debug!(contact_id = %contact_id, "Contact patched");
            self.announce(&contact, json!({ "field": "profile" }));
        }
        Ok(contact)
    }

    async fn load(&self, contact_id: Uuid) -> Result<Contact, ConversationError> {
        self.contacts
            .get_contact(contact_id)
            .await?
            .ok_or(ConversationError::ContactNotFound { id: contact_id })
    }

    async fn save(&self, contact: &mut Contact) -> Result<(), ConversationError> {
        contact.updated_at = Utc::now();
        self.contacts.update_contact(contact).await?;
        Ok(())
    }

    fn announce(&self, contact: &Contact, change: serde_json::Value) {
        self.bus.publish(
            Event::new(EventType::ContactUpdated)
                .for_contact(contact.id, contact.channel_handle.as_str())
                .with_payload(json!({ "contact": contact, "change": change })),
        );
    }
}
