//! Error types for the conversation core.

use uuid::Uuid;

/// Top-level error type for service startup and shutdown.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures from an external collaborator (messaging provider, publishing
/// API, subscription API).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request to {service} failed: {reason}")]
    RequestFailed { service: String, reason: String },

    #[error("{service} rejected the request with status {status}: {body}")]
    Rejected {
        service: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("No transport configured for channel {channel}")]
    NotConfigured { channel: String },

    #[error("Collaborator call panicked: {0}")]
    Panicked(String),
}

/// Errors surfaced by the thread store and the contact state machine.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("Contact {id} not found")]
    ContactNotFound { id: Uuid },

    #[error("Invalid status: {status:?}")]
    InvalidStatus { status: String },

    #[error("Flag {flag} is monotonic and cannot be reset to false")]
    IllegalFlagReset { flag: String },

    #[error("Unknown conversation flag: {name:?}")]
    UnknownFlag { name: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("External transport error: {0}")]
    ExternalTransport(#[from] TransportError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
