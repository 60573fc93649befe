//! Core types and traits for the snip URL shortener.
//!
//! This crate provides the record model, the short code type and the
//! [`Store`] contract implemented by every storage backend.

pub mod error;
pub mod record;
pub mod shortcode;
pub mod store;

pub use error::{CoreError, Result, StoreError};
pub use record::{LoadedUrl, Shortened, UrlRecord, UserUrlEntry};
pub use shortcode::ShortCode;
pub use store::{Store, MAX_ALLOCATION_ATTEMPTS};
