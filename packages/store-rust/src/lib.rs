//! Debounced write-back cache with preset-namespaced item handles.

pub mod storage;

pub use storage::{
    CacheEngine, Diagnostic, DiagnosticSink, ImportError, ImportReport, MemoryAdapter,
    StorageAdapter, StorageItem, StoreConfig, TypedItem,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
