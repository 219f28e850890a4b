//! Error type for structural graph operations.

use std::collections::TryReserveError;

use thiserror::Error;

/// Result alias for graph mutations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors raised by the graph store.
///
/// A failed mutation leaves every arena and index exactly as it was before
/// the call: capacity is reserved up front, and only then is anything written.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Growing an arena, adjacency list, or index failed.
    #[error("out of capacity while growing {what}")]
    Capacity {
        what: &'static str,
        #[source]
        source: TryReserveError,
    },

    /// A handle whose slot has been freed (or reused) was passed in.
    #[error("stale {kind} handle {index}:{generation}")]
    StaleHandle {
        kind: &'static str,
        index: u32,
        generation: u32,
    },
}

impl GraphError {
    pub(crate) fn capacity(what: &'static str) -> impl FnOnce(TryReserveError) -> Self {
        move |source| GraphError::Capacity { what, source }
    }
}
