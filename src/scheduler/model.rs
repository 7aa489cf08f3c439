//! Records and reports for the scheduler's drivers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A piece of content scheduled for publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: Uuid,
    /// URL or provider reference of the media to publish.
    pub media_ref: String,
    pub caption: String,
    pub scheduled_at: DateTime<Utc>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    /// Failed publish attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(
        media_ref: impl Into<String>,
        caption: impl Into<String>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            media_ref: media_ref.into(),
            caption: caption.into(),
            scheduled_at,
            published: false,
            published_at: None,
            external_id: None,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
        }
    }
}

/// A subscription held with an external API that must be renewed before it
/// lapses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSubscription {
    pub id: Uuid,
    /// Account the subscription belongs to; passed to the renewer.
    pub owner_id: String,
    /// `None` means the expiration is unknown, which always counts as due.
    pub watch_expiration: Option<DateTime<Utc>>,
    pub last_renewed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExternalSubscription {
    pub fn new(owner_id: impl Into<String>, watch_expiration: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            watch_expiration,
            last_renewed_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Whether this subscription should be renewed given `threshold`.
    pub fn is_due(&self, threshold: DateTime<Utc>) -> bool {
        self.watch_expiration.is_none_or(|exp| exp < threshold)
    }
}

/// Outcome of one publish driver wake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub published: usize,
    pub failed: usize,
}

impl PublishReport {
    pub fn processed(&self) -> usize {
        self.published + self.failed
    }
}

/// Outcome of one renewal driver wake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalReport {
    pub renewed: usize,
    pub failed: usize,
}

impl RenewalReport {
    pub fn processed(&self) -> usize {
        self.renewed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn missing_expiration_is_always_due() {
        let sub = ExternalSubscription::new("acct", None);
        assert!(sub.is_due(Utc::now() - Duration::days(365)));
    }

    #[test]
    fn expiration_inside_threshold_is_due() {
        let now = Utc::now();
        let threshold = now + Duration::days(2);
        assert!(ExternalSubscription::new("a", Some(now + Duration::days(1))).is_due(threshold));
        assert!(!ExternalSubscription::new("b", Some(now + Duration::days(5))).is_due(threshold));
    }
}
