//! Full-text index: on-disk schema, versioning, writes and queries.

pub mod schema;
pub mod store;

pub use store::{IndexStore, IndexWriter, OpenStatus};
