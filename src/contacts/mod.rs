//! Contacts and the per-contact conversation state machine.

pub mod locks;
pub mod model;
pub mod state_machine;

pub use locks::ContactLocks;
pub use model::{
    Channel, Contact, ContactPatch, ContactStatus, ContactTag, ConversationFlag,
    ConversationFlags, StatusCounters,
};
pub use state_machine::ContactStateMachine;
