//! Reportable conditions and the injected sink that receives them.
//!
//! Nothing in the engine fails its callers. Every absorbed problem is logged
//! with `tracing` and handed to the configured [`DiagnosticSink`], which is
//! how a UI surfaces "your stored data was repaired" style messages.

use std::sync::Arc;

use preset_store_core::KeyError;
use thiserror::Error;

/// A condition the engine absorbed instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    /// A stored option key was not `prefix.preset.name`; it was dropped from
    /// the cache and scheduled for deletion.
    #[error("invalid option key `{key}` was dropped")]
    MalformedOptionKey {
        /// The offending physical key.
        key: String,
    },
    /// A write issued before the initial load completed was overwritten by
    /// the stored record.
    #[error(
        "storage key `{key}` was {} before initialization completed; the stored record wins",
        removal_verb(.removal)
    )]
    PendingWriteDiscarded {
        /// Key whose pending write was discarded.
        key: String,
        /// Whether the discarded write was a removal.
        removal: bool,
    },
    /// A bulk import was refused before touching any state.
    #[error("import rejected: {reason}")]
    ImportRejected {
        /// Why the import was refused.
        reason: String,
    },
    /// A bulk import skipped keys outside both key namespaces.
    #[error("invalid keys were ignored during import: {}", .keys.join(", "))]
    ImportKeysIgnored {
        /// The skipped keys.
        keys: Vec<String>,
    },
    /// A validator panicked; the item's default was used instead.
    #[error("validator for `{key}` panicked; the default record was substituted")]
    ValidatorPanicked {
        /// Logical key of the item.
        key: String,
    },
    /// A caller used a key outside the permitted namespaces.
    #[error(transparent)]
    ForbiddenKey(#[from] KeyError),
}

fn removal_verb(removal: &bool) -> &'static str {
    if *removal {
        "deleted"
    } else {
        "changed"
    }
}

impl Diagnostic {
    /// Logs the diagnostic at the level matching its severity.
    pub(crate) fn log(&self) {
        match self {
            Self::PendingWriteDiscarded { .. }
            | Self::ImportRejected { .. }
            | Self::ValidatorPanicked { .. } => tracing::warn!("{self}"),
            Self::MalformedOptionKey { .. }
            | Self::ImportKeysIgnored { .. }
            | Self::ForbiddenKey(_) => tracing::info!("{self}"),
        }
    }
}

/// Receiver of [`Diagnostic`]s: the injected logging callback.
///
/// Called synchronously from engine operations; implementations must not
/// block and must not call back into the engine.
///
/// Used as `Arc<dyn DiagnosticSink>`.
pub trait DiagnosticSink: Send + Sync {
    /// Receives one diagnostic.
    fn report(&self, diagnostic: &Diagnostic);
}

/// Sink that discards everything. `tracing` output still happens.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&self, _: &Diagnostic) {}
}

/// Sink wrapping a closure.
pub struct FnSink<F>(pub F);

impl<F> DiagnosticSink for FnSink<F>
where
    F: Fn(&Diagnostic) + Send + Sync,
{
    fn report(&self, diagnostic: &Diagnostic) {
        (self.0)(diagnostic);
    }
}

/// Sink that fans out to several sinks.
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl CompositeSink {
    /// Creates a composite over `sinks`.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn DiagnosticSink>>) -> Self {
        Self { sinks }
    }

    /// Adds a sink after construction.
    pub fn add(&mut self, sink: Arc<dyn DiagnosticSink>) {
        self.sinks.push(sink);
    }
}

impl DiagnosticSink for CompositeSink {
    fn report(&self, diagnostic: &Diagnostic) {
        for sink in &self.sinks {
            sink.report(diagnostic);
        }
    }
}
