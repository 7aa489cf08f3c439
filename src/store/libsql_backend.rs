//! libSQL backend: implements every store trait on one async connection.
//!
//! Supports local file and in-memory databases. Times that drive ordering
//! or due-ness are stored as integer milliseconds; bookkeeping times are
//! RFC 3339 text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::contacts::model::{Channel, Contact, ContactStatus, ContactTag};
use crate::error::DatabaseError;
use crate::scheduler::model::{ContentItem, ExternalSubscription};
use crate::store::migrations;
use crate::store::traits::{ContactStore, ContentStore, Database, SubscriptionStore, ThreadStore};
use crate::threads::model::{MediaMetadata, Message, MessageType};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Id of the contact's thread, if one exists.
    async fn thread_id_for(&self, contact_id: Uuid) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM threads WHERE contact_id = ?1",
                params![contact_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("thread_id_for: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("thread_id_for row: {e}")))?;
                Ok(Some(id))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("thread_id_for: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("{what} id {s:?}: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(format!("{what}: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(format!("{what}: {e}")))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn bool_to_int(b: bool) -> i64 {
    if b { 1 } else { 0 }
}

/// Map a failed write, separating uniqueness violations from other errors.
fn write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

const CONTACT_COLUMNS: &str = "id, channel, channel_handle, display_name, note, case_summary, \
    case_info, status, tags, favorite, archived, product_interest, flags, \
    initial_flow_completed, status_counters, last_message_text, last_message_at_ms, \
    created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "m.id, m.external_id, m.text, m.timestamp_ms, m.message_type, m.sender_tag, m.media";

const CONTENT_COLUMNS: &str = "id, media_ref, caption, scheduled_at_ms, published, published_at, \
    external_id, attempts, last_error, created_at";

const SUBSCRIPTION_COLUMNS: &str =
    "id, owner_id, watch_expiration_ms, last_renewed_at, last_error, created_at";

/// Map a libsql Row to a Contact. Column order matches CONTACT_COLUMNS.
fn row_to_contact(row: &libsql::Row) -> Result<Contact, DatabaseError> {
    let get_text = |i: i32| -> Result<String, DatabaseError> {
        row.get::<String>(i)
            .map_err(|e| DatabaseError::Query(format!("contact column {i}: {e}")))
    };
    let get_int = |i: i32| -> Result<i64, DatabaseError> {
        row.get::<i64>(i)
            .map_err(|e| DatabaseError::Query(format!("contact column {i}: {e}")))
    };

    let id_str = get_text(0)?;
    let channel: Channel = get_text(1)?
        .parse()
        .map_err(DatabaseError::Serialization)?;
    let status: ContactStatus = get_text(7)?
        .parse()
        .map_err(|e| DatabaseError::Serialization(format!("contact status: {e}")))?;
    let tags: Vec<ContactTag> = from_json(&get_text(8)?, "contact tags")?;
    let last_message_at_ms: Option<i64> = row.get(16).ok();

    Ok(Contact {
        id: parse_uuid(&id_str, "contact")?,
        channel,
        channel_handle: get_text(2)?,
        display_name: get_text(3)?,
        note: get_text(4)?,
        case_summary: get_text(5)?,
        case_info: get_text(6)?,
        status,
        tags: tags.into_iter().collect(),
        favorite: get_int(9)? != 0,
        archived: get_int(10)? != 0,
        product_interest: get_text(11)?,
        flags: from_json(&get_text(12)?, "contact flags")?,
        initial_flow_completed: get_int(13)? != 0,
        status_counters: from_json(&get_text(14)?, "status counters")?,
        last_message_text: row.get(15).ok(),
        last_message_at: last_message_at_ms.map(from_millis),
        created_at: parse_datetime(&get_text(17)?),
        updated_at: parse_datetime(&get_text(18)?),
    })
}

/// Map a libsql Row to a Message. Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<Message, DatabaseError> {
    let err = |e: libsql::Error| DatabaseError::Query(format!("message row: {e}"));
    let id_str: String = row.get(0).map_err(err)?;
    let type_str: String = row.get(4).map_err(err)?;
    let media_str: Option<String> = row.get(6).ok();

    let media = match media_str {
        Some(s) => Some(from_json::<MediaMetadata>(&s, "message media")?),
        None => None,
    };

    Ok(Message {
        id: parse_uuid(&id_str, "message")?,
        external_id: row.get(1).map_err(err)?,
        text: row.get(2).map_err(err)?,
        timestamp: from_millis(row.get(3).map_err(err)?),
        message_type: type_str.parse::<MessageType>().unwrap_or_default(),
        sender_tag: row.get(5).map_err(err)?,
        media,
    })
}

/// Map a libsql Row to a ContentItem. Column order matches CONTENT_COLUMNS.
fn row_to_content(row: &libsql::Row) -> Result<ContentItem, DatabaseError> {
    let err = |e: libsql::Error| DatabaseError::Query(format!("content row: {e}"));
    let id_str: String = row.get(0).map_err(err)?;
    let published_at: Option<String> = row.get(5).ok();
    let attempts: i64 = row.get(7).map_err(err)?;
    let created_str: String = row.get(9).map_err(err)?;

    Ok(ContentItem {
        id: parse_uuid(&id_str, "content")?,
        media_ref: row.get(1).map_err(err)?,
        caption: row.get(2).map_err(err)?,
        scheduled_at: from_millis(row.get(3).map_err(err)?),
        published: row.get::<i64>(4).map_err(err)? != 0,
        published_at: parse_optional_datetime(&published_at),
        external_id: row.get(6).ok(),
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error: row.get(8).ok(),
        created_at: parse_datetime(&created_str),
    })
}

/// Map a libsql Row to an ExternalSubscription.
fn row_to_subscription(row: &libsql::Row) -> Result<ExternalSubscription, DatabaseError> {
    let err = |e: libsql::Error| DatabaseError::Query(format!("subscription row: {e}"));
    let id_str: String = row.get(0).map_err(err)?;
    let expiration_ms: Option<i64> = row.get(2).ok();
    let last_renewed: Option<String> = row.get(3).ok();
    let created_str: String = row.get(5).map_err(err)?;

    Ok(ExternalSubscription {
        id: parse_uuid(&id_str, "subscription")?,
        owner_id: row.get(1).map_err(err)?,
        watch_expiration: expiration_ms.map(from_millis),
        last_renewed_at: parse_optional_datetime(&last_renewed),
        last_error: row.get(4).ok(),
        created_at: parse_datetime(&created_str),
    })
}

/// Drain all rows through `map`.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    op: &str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    loop {
        match rows.next().await {
            Ok(Some(row)) => out.push(map(&row)?),
            Ok(None) => break,
            Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
    Ok(out)
}

/// Fetch at most one row through `map`.
async fn first_row<T>(
    mut rows: libsql::Rows,
    op: &str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Option<T>, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => Ok(Some(map(&row)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
    }
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }
}

#[async_trait]
impl ContactStore for LibSqlBackend {
    async fn insert_contact(&self, contact: &Contact) -> Result<(), DatabaseError> {
        let tags: Vec<ContactTag> = contact.tags.iter().copied().collect();
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO contacts ({CONTACT_COLUMNS}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
                ),
                params![
                    contact.id.to_string(),
                    contact.channel.as_str(),
                    contact.channel_handle.as_str(),
                    contact.display_name.as_str(),
                    contact.note.as_str(),
                    contact.case_summary.as_str(),
                    contact.case_info.as_str(),
                    contact.status.as_str(),
                    to_json(&tags, "contact tags")?,
                    bool_to_int(contact.favorite),
                    bool_to_int(contact.archived),
                    contact.product_interest.as_str(),
                    to_json(&contact.flags, "contact flags")?,
                    bool_to_int(contact.initial_flow_completed),
                    to_json(&contact.status_counters, "status counters")?,
                    opt_text(contact.last_message_text.as_deref()),
                    opt_int(contact.last_message_at.map(|t| t.timestamp_millis())),
                    contact.created_at.to_rfc3339(),
                    contact.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_error("insert_contact", e))?;

        debug!(contact_id = %contact.id, channel = %contact.channel, "Contact inserted into DB");
        Ok(())
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_contact: {e}")))?;
        first_row(rows, "get_contact", row_to_contact).await
    }

    async fn find_contact_by_handle(
        &self,
        channel: Channel,
        handle: &str,
    ) -> Result<Option<Contact>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM contacts WHERE channel = ?1 AND channel_handle = ?2"
                ),
                params![channel.as_str(), handle],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_contact_by_handle: {e}")))?;
        first_row(rows, "find_contact_by_handle", row_to_contact).await
    }

    async fn update_contact(&self, contact: &Contact) -> Result<(), DatabaseError> {
        let tags: Vec<ContactTag> = contact.tags.iter().copied().collect();
        let affected = self
            .conn()
            .execute(
                "UPDATE contacts SET display_name = ?1, note = ?2, case_summary = ?3, case_info = ?4, \
                 status = ?5, tags = ?6, favorite = ?7, archived = ?8, product_interest = ?9, \
                 flags = ?10, initial_flow_completed = ?11, status_counters = ?12, \
                 last_message_text = ?13, last_message_at_ms = ?14, updated_at = ?15 \
                 WHERE id = ?16",
                params![
                    contact.display_name.as_str(),
                    contact.note.as_str(),
                    contact.case_summary.as_str(),
                    contact.case_info.as_str(),
                    contact.status.as_str(),
                    to_json(&tags, "contact tags")?,
                    bool_to_int(contact.favorite),
                    bool_to_int(contact.archived),
                    contact.product_interest.as_str(),
                    to_json(&contact.flags, "contact flags")?,
                    bool_to_int(contact.initial_flow_completed),
                    to_json(&contact.status_counters, "status counters")?,
                    opt_text(contact.last_message_text.as_deref()),
                    opt_int(contact.last_message_at.map(|t| t.timestamp_millis())),
                    contact.updated_at.to_rfc3339(),
                    contact.id.to_string(),
                ],
            )
            .await
            .map_err(|e| write_error("update_contact", e))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "contact".into(),
                id: contact.id.to_string(),
            });
        }
        debug!(contact_id = %contact.id, "Contact updated in DB");
        Ok(())
    }

    async fn list_contacts(&self, channel: Option<Channel>) -> Result<Vec<Contact>, DatabaseError> {
        let order = "ORDER BY COALESCE(last_message_at_ms, 0) DESC, created_at DESC";
        let rows = match channel {
            Some(channel) => self
                .conn()
                .query(
                    &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE channel = ?1 {order}"),
                    params![channel.as_str()],
                )
                .await,
            None => self
                .conn()
                .query(&format!("SELECT {CONTACT_COLUMNS} FROM contacts {order}"), ())
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("list_contacts: {e}")))?;
        collect_rows(rows, "list_contacts", row_to_contact).await
    }
}

#[async_trait]
impl ThreadStore for LibSqlBackend {
    async fn ensure_thread(&self, contact_id: Uuid) -> Result<Uuid, DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO threads (id, contact_id, created_at) VALUES (?1, ?2, ?3)",
                params![
                    Uuid::new_v4().to_string(),
                    contact_id.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_error("ensure_thread", e))?;

        let id = self
            .thread_id_for(contact_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "thread".into(),
                id: contact_id.to_string(),
            })?;
        parse_uuid(&id, "thread")
    }

    async fn insert_thread_message(
        &self,
        thread_id: Uuid,
        message: &Message,
    ) -> Result<(), DatabaseError> {
        let media = match &message.media {
            Some(m) => Some(to_json(m, "message media")?),
            None => None,
        };
        self.conn()
            .execute(
                "INSERT INTO thread_messages (id, thread_id, external_id, text, timestamp_ms, \
                 message_type, sender_tag, media) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    message.id.to_string(),
                    thread_id.to_string(),
                    message.external_id.as_str(),
                    message.text.as_str(),
                    message.timestamp.timestamp_millis(),
                    message.message_type.as_str(),
                    message.sender_tag.as_str(),
                    opt_text(media.as_deref()),
                ],
            )
            .await
            .map_err(|e| write_error("insert_thread_message", e))?;

        debug!(thread_id = %thread_id, message_id = %message.id, "Thread message inserted");
        Ok(())
    }

    async fn list_thread_messages(&self, contact_id: Uuid) -> Result<Vec<Message>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM thread_messages m \
                     JOIN threads t ON t.id = m.thread_id \
                     WHERE t.contact_id = ?1 ORDER BY m.seq ASC"
                ),
                params![contact_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_thread_messages: {e}")))?;
        collect_rows(rows, "list_thread_messages", row_to_message).await
    }

    async fn delete_thread(&self, contact_id: Uuid) -> Result<usize, DatabaseError> {
        let Some(thread_id) = self.thread_id_for(contact_id).await? else {
            return Ok(0);
        };

        let removed = self
            .conn()
            .execute(
                "DELETE FROM thread_messages WHERE thread_id = ?1",
                params![thread_id.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_thread messages: {e}")))?;

        self.conn()
            .execute("DELETE FROM threads WHERE id = ?1", params![thread_id.as_str()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_thread: {e}")))?;

        debug!(contact_id = %contact_id, removed, "Thread deleted");
        Ok(removed as usize)
    }
}

#[async_trait]
impl ContentStore for LibSqlBackend {
    async fn insert_content(&self, item: &ContentItem) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO content_items ({CONTENT_COLUMNS}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    item.id.to_string(),
                    item.media_ref.as_str(),
                    item.caption.as_str(),
                    item.scheduled_at.timestamp_millis(),
                    bool_to_int(item.published),
                    opt_text(item.published_at.map(|t| t.to_rfc3339()).as_deref()),
                    opt_text(item.external_id.as_deref()),
                    i64::from(item.attempts),
                    opt_text(item.last_error.as_deref()),
                    item.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_error("insert_content", e))?;
        Ok(())
    }

    async fn get_content(&self, id: Uuid) -> Result<Option<ContentItem>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {CONTENT_COLUMNS} FROM content_items WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_content: {e}")))?;
        first_row(rows, "get_content", row_to_content).await
    }

    async fn list_due_content(&self, now: DateTime<Utc>) -> Result<Vec<ContentItem>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONTENT_COLUMNS} FROM content_items \
                     WHERE published = 0 AND scheduled_at_ms <= ?1 \
                     ORDER BY scheduled_at_ms ASC"
                ),
                params![now.timestamp_millis()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_due_content: {e}")))?;
        collect_rows(rows, "list_due_content", row_to_content).await
    }

    async fn claim_content(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE content_items SET published = 1 WHERE id = ?1 AND published = 0",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_content: {e}")))?;
        Ok(affected == 1)
    }

    async fn mark_content_published(
        &self,
        id: Uuid,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE content_items SET published = 1, published_at = ?1, external_id = ?2, \
                 last_error = NULL WHERE id = ?3",
                params![at.to_rfc3339(), external_id, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_content_published: {e}")))?;
        Ok(())
    }

    async fn release_content(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE content_items SET published = 0, attempts = attempts + 1, last_error = ?1 \
                 WHERE id = ?2",
                params![error, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("release_content: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for LibSqlBackend {
    async fn insert_subscription(&self, sub: &ExternalSubscription) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO subscriptions ({SUBSCRIPTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![
                    sub.id.to_string(),
                    sub.owner_id.as_str(),
                    opt_int(sub.watch_expiration.map(|t| t.timestamp_millis())),
                    opt_text(sub.last_renewed_at.map(|t| t.to_rfc3339()).as_deref()),
                    opt_text(sub.last_error.as_deref()),
                    sub.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_error("insert_subscription", e))?;
        Ok(())
    }

    async fn get_subscription(
        &self,
        id: Uuid,
    ) -> Result<Option<ExternalSubscription>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_subscription: {e}")))?;
        first_row(rows, "get_subscription", row_to_subscription).await
    }

    async fn list_subscriptions_due(
        &self,
        threshold: DateTime<Utc>,
    ) -> Result<Vec<ExternalSubscription>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
                     WHERE watch_expiration_ms IS NULL OR watch_expiration_ms < ?1 \
                     ORDER BY COALESCE(watch_expiration_ms, 0) ASC"
                ),
                params![threshold.timestamp_millis()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_subscriptions_due: {e}")))?;
        collect_rows(rows, "list_subscriptions_due", row_to_subscription).await
    }

    async fn record_renewal(
        &self,
        id: Uuid,
        new_expiration: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE subscriptions SET watch_expiration_ms = ?1, last_renewed_at = ?2, \
                 last_error = NULL WHERE id = ?3",
                params![new_expiration.timestamp_millis(), at.to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_renewal: {e}")))?;
        Ok(())
    }

    async fn record_renewal_failure(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE subscriptions SET last_error = ?1 WHERE id = ?2",
                params![error, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_renewal_failure: {e}")))?;
        Ok(())
    }
}
