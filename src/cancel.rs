//! Cooperative cancellation flag checked at block boundaries by long-running
//! operations (shard writes/reads, planning, conversion).
//!
//! No async runtime is required for this (see SPEC_FULL.md §9): a plain
//! `Arc<AtomicBool>` checked between blocking steps is enough for every
//! cancellation point the design names.

use crate::error::{PamError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(PamError::Cancelled)` if cancellation was requested;
    /// call at each block/record-batch boundary in long-running loops.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PamError::Cancelled)
        } else {
            Ok(())
        }
    }
}
