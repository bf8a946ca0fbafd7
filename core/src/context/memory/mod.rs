//! Memory subsystem for context storage and retrieval.

pub mod store;

pub use store::{ContextQuery, ContextStore};
