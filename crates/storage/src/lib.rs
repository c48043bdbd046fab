//! Collaborator abstractions for Tandem.
//!
//! This crate provides the record store and text source traits the
//! concurrency components consume, plus in-memory and file-backed
//! reference implementations.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory_store;
pub mod text_source;

pub use trait_::{RecordStore, TextSource, StorageError, Result};
pub use memory_store::MemoryRecordStore;
pub use text_source::{FileTextSource, MemoryTextSource, read_json};
