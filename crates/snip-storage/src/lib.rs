//! Storage backends for the snip URL shortener.
//!
//! Three interchangeable implementations of [`snip_core::Store`] live here:
//! an in-memory store, an append-only file journal and PostgreSQL. Callers
//! usually go through [`open_store`], which picks one from a [`StoreConfig`].

mod allocation;
pub mod backend;
pub mod config;
pub mod journal;
pub mod memory;
pub mod postgres;

pub use backend::{open_store, AnyStore};
pub use config::{normalize_base_url, redact_dsn, BackendKind, PostgresSettings, StoreConfig};
pub use journal::JournalStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use snip_core::{Store, StoreError};
