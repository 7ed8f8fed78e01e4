//! Unsubscriber: finds, resolves and executes mailing-list unsubscribe methods.

pub mod classify;
pub mod config;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod extract;
pub mod history;
pub mod pipeline;
pub mod redact;
pub mod safety;
pub mod store;
