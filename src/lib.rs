//! `mailfts`: incremental full-text search for mail stores.
//!
//! This crate provides an on-disk FTS5 index derived from a message corpus,
//! a compiler for operator-prefixed search queries, and a resumable
//! background worker that keeps the index in step with the corpus.

pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod parser;
pub mod search;
pub mod store;
pub mod worker;
