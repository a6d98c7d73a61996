//! Message corpus storage: the `.eml` directory catalog.

pub mod catalog;

pub use catalog::{CatalogStats, MailCatalog, RefreshReport};
