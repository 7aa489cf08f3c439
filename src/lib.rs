//! Convo CRM: customer-conversation core for messaging channels.

pub mod api;
pub mod channels;
pub mod config;
pub mod contacts;
pub mod conversation;
pub mod error;
pub mod events;
pub mod logging;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod threads;
