//! Cache and persistence layer for the preset store.
//!
//! The layers, leaves first:
//!
//! - [`StorageAdapter`]: uniform async key → record backend
//!   ([`MemoryAdapter`], [`TextStoreAdapter`], and `RedbAdapter` with the
//!   `redb` feature)
//! - [`CacheEngine`]: authoritative in-memory cache with a debounced
//!   write-back buffer, initial reconciliation and bulk import/export
//! - [`StorageItem`] / [`TypedItem`]: memoized, validated handles over one
//!   logical key, optionally following the active preset
//!
//! Problems the engine absorbs are reported as [`Diagnostic`]s to the
//! injected [`DiagnosticSink`].

pub mod adapter;
pub mod adapters;
pub mod config;
pub mod diagnostics;
mod engine;
pub mod import;
mod item;
mod preset;

pub use adapter::StorageAdapter;
pub use adapters::*;
pub use config::StoreConfig;
pub use diagnostics::{CompositeSink, Diagnostic, DiagnosticSink, FnSink, NullSink};
pub use engine::CacheEngine;
pub use import::{ImportError, ImportReport};
pub use item::{StorageItem, TypedItem};
