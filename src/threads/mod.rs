//! Per-contact message threads.

pub mod model;
pub mod store;

pub use model::{
    AppendedMessage, CacheStatus, MediaMetadata, Message, MessageType, NewMessage, SYSTEM_SENDER,
};
pub use store::MessageThreadStore;
