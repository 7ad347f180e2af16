//! Shared handlers returning serializable results.

pub mod message;
