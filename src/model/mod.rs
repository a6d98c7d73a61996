//! Core data model types for messages, index entries and addresses.

pub mod address;
pub mod message;
