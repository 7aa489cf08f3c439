//! Contact data model: channels, qualification statuses, tags, and
//! conversation flags.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConversationError;

/// Default value of `product_interest` for a fresh contact.
pub const UNKNOWN_PRODUCT_INTEREST: &str = "UNKNOWN";

/// External messaging surface a contact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Whatsapp,
    Instagram,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Instagram => "instagram",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whatsapp" => Ok(Self::Whatsapp),
            "instagram" => Ok(Self::Instagram),
            _ => Err(format!("Unknown channel: {}", s)),
        }
    }
}

/// Lead-qualification status of a contact.
///
/// Transitions are not restricted: any status may follow any other. The
/// qualification logic that decides which one to request lives with the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactStatus {
    NewContact,
    ScreeningInProgress,
    LegalScreeningComplete,
    UrgentCase,
    HandedOffToHuman,
    NotALegalCase,
}

impl ContactStatus {
    pub const ALL: [ContactStatus; 6] = [
        Self::NewContact,
        Self::ScreeningInProgress,
        Self::LegalScreeningComplete,
        Self::UrgentCase,
        Self::HandedOffToHuman,
        Self::NotALegalCase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewContact => "NewContact",
            Self::ScreeningInProgress => "ScreeningInProgress",
            Self::LegalScreeningComplete => "LegalScreeningComplete",
            Self::UrgentCase => "UrgentCase",
            Self::HandedOffToHuman => "HandedOffToHuman",
            Self::NotALegalCase => "NotALegalCase",
        }
    }

    /// Whether reaching this status ends the initial qualification flow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::LegalScreeningComplete
                | Self::UrgentCase
                | Self::HandedOffToHuman
                | Self::NotALegalCase
        )
    }
}

impl Default for ContactStatus {
    fn default() -> Self {
        Self::NewContact
    }
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContactStatus {
    type Err = ConversationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ConversationError::InvalidStatus {
                status: s.to_string(),
            })
    }
}

/// Labels a dashboard user can attach to a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContactTag {
    Urgent,
    Important,
    FollowUp,
    Client,
    Prospect,
}

/// Conversation-progress flags.
///
/// Monotonic flags only ever move from `false` to `true`; re-settable flags
/// may toggle freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationFlag {
    Greeted,
    SummaryRequested,
    SummaryConfirmed,
    UrgencyResolved,
    PickingDate,
    SchedulingProposed,
    SchedulingConfirmed,
}

impl ConversationFlag {
    pub const ALL: [ConversationFlag; 7] = [
        Self::Greeted,
        Self::SummaryRequested,
        Self::SummaryConfirmed,
        Self::UrgencyResolved,
        Self::PickingDate,
        Self::SchedulingProposed,
        Self::SchedulingConfirmed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeted => "greeted",
            Self::SummaryRequested => "summaryRequested",
            Self::SummaryConfirmed => "summaryConfirmed",
            Self::UrgencyResolved => "urgencyResolved",
            Self::PickingDate => "pickingDate",
            Self::SchedulingProposed => "schedulingProposed",
            Self::SchedulingConfirmed => "schedulingConfirmed",
        }
    }

    pub fn is_monotonic(&self) -> bool {
        matches!(
            self,
            Self::Greeted | Self::SummaryRequested | Self::SummaryConfirmed | Self::UrgencyResolved
        )
    }
}

impl std::fmt::Display for ConversationFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConversationFlag {
    type Err = ConversationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|flag| flag.as_str() == trimmed)
            .ok_or_else(|| ConversationError::UnknownFlag {
                name: s.to_string(),
            })
    }
}

/// Current value of every conversation flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationFlags {
    pub greeted: bool,
    pub summary_requested: bool,
    pub summary_confirmed: bool,
    pub urgency_resolved: bool,
    pub picking_date: bool,
    pub scheduling_proposed: bool,
    pub scheduling_confirmed: bool,
}

impl ConversationFlags {
    pub fn get(&self, flag: ConversationFlag) -> bool {
        match flag {
            ConversationFlag::Greeted => self.greeted,
            ConversationFlag::SummaryRequested => self.summary_requested,
            ConversationFlag::SummaryConfirmed => self.summary_confirmed,
            ConversationFlag::UrgencyResolved => self.urgency_resolved,
            ConversationFlag::PickingDate => self.picking_date,
            ConversationFlag::SchedulingProposed => self.scheduling_proposed,
            ConversationFlag::SchedulingConfirmed => self.scheduling_confirmed,
        }
    }

    pub fn set(&mut self, flag: ConversationFlag, value: bool) {
        let slot = match flag {
            ConversationFlag::Greeted => &mut self.greeted,
            ConversationFlag::SummaryRequested => &mut self.summary_requested,
            ConversationFlag::SummaryConfirmed => &mut self.summary_confirmed,
            ConversationFlag::UrgencyResolved => &mut self.urgency_resolved,
            ConversationFlag::PickingDate => &mut self.picking_date,
            ConversationFlag::SchedulingProposed => &mut self.scheduling_proposed,
            ConversationFlag::SchedulingConfirmed => &mut self.scheduling_confirmed,
        };
        *slot = value;
    }
}

/// Per-status message counters used for analytics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusCounters {
    pub new_contact: u32,
    pub screening_in_progress: u32,
    pub legal_screening_complete: u32,
    pub urgent_case: u32,
    pub handed_off_to_human: u32,
    pub not_a_legal_case: u32,
}

impl StatusCounters {
    /// Counter field backing `status`.
    pub fn counter_mut(&mut self, status: ContactStatus) -> &mut u32 {
        match status {
            ContactStatus::NewContact => &mut self.new_contact,
            ContactStatus::ScreeningInProgress => &mut self.screening_in_progress,
            ContactStatus::LegalScreeningComplete => &mut self.legal_screening_complete,
            ContactStatus::UrgentCase => &mut self.urgent_case,
            ContactStatus::HandedOffToHuman => &mut self.handed_off_to_human,
            ContactStatus::NotALegalCase => &mut self.not_a_legal_case,
        }
    }

    pub fn get(&self, status: ContactStatus) -> u32 {
        match status {
            ContactStatus::NewContact => self.new_contact,
            ContactStatus::ScreeningInProgress => self.screening_in_progress,
            ContactStatus::LegalScreeningComplete => self.legal_screening_complete,
            ContactStatus::UrgentCase => self.urgent_case,
            ContactStatus::HandedOffToHuman => self.handed_off_to_human,
            ContactStatus::NotALegalCase => self.not_a_legal_case,
        }
    }
}

/// A lead/customer record tied to one messaging channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    pub channel: Channel,
    /// Phone number or social handle, unique within `channel`.
    pub channel_handle: String,
    pub display_name: String,
    pub note: String,
    pub case_summary: String,
    pub case_info: String,
    pub status: ContactStatus,
    pub tags: BTreeSet<ContactTag>,
    pub favorite: bool,
    pub archived: bool,
    pub product_interest: String,
    pub flags: ConversationFlags,
    pub initial_flow_completed: bool,
    pub status_counters: StatusCounters,
    /// Cached text of the most recent thread entry.
    pub last_message_text: Option<String>,
    /// Cached timestamp of the most recent thread entry.
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Create a fresh contact for a handle seen for the first time.
    pub fn new(channel: Channel, channel_handle: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            channel,
            channel_handle: channel_handle.into(),
            display_name: String::new(),
            note: String::new(),
            case_summary: String::new(),
            case_info: String::new(),
            status: ContactStatus::NewContact,
            tags: BTreeSet::new(),
            favorite: false,
            archived: false,
            product_interest: UNKNOWN_PRODUCT_INTEREST.to_string(),
            flags: ConversationFlags::default(),
            initial_flow_completed: false,
            status_counters: StatusCounters::default(),
            last_message_text: None,
            last_message_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Drop the cached last-message fields. Returns whether anything changed.
    pub fn clear_last_message(&mut self) -> bool {
        let changed = self.last_message_text.is_some() || self.last_message_at.is_some();
        self.last_message_text = None;
        self.last_message_at = None;
        changed
    }
}

/// Partial update of a contact's profile fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPatch {
    pub display_name: Option<String>,
    pub note: Option<String>,
    pub case_summary: Option<String>,
    pub case_info: Option<String>,
    pub product_interest: Option<String>,
    pub favorite: Option<bool>,
    pub archived: Option<bool>,
    /// Replaces the whole tag set; duplicates collapse.
    pub tags: Option<Vec<ContactTag>>,
}

impl ContactPatch {
    /// Apply the patch. Returns whether any field changed.
    pub fn apply(self, contact: &mut Contact) -> bool {
        let before = contact.clone();
        if let Some(v) = self.display_name {
            contact.display_name = v;
        }
        if let Some(v) = self.note {
            contact.note = v;
        }
        if let Some(v) = self.case_summary {
            contact.case_summary = v;
        }
        if let Some(v) = self.case_info {
            contact.case_info = v;
        }
        if let Some(v) = self.product_interest {
            contact.product_interest = v;
        }
        if let Some(v) = self.favorite {
            contact.favorite = v;
        }
        if let Some(v) = self.archived {
            contact.archived = v;
        }
        if let Some(tags) = self.tags {
            contact.tags = tags.into_iter().collect();
        }
        *contact != before
    }
}
