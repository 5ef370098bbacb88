//! Ambient cancellation token.
//!
//! Blocking I/O is the expected mode for this crate, so cancellation is a
//! plain shared flag rather than an async-runtime primitive. Streaming
//! operations check it every [`CHUNK_SIZE`] bytes and on every outer loop
//! iteration of enumeration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};

/// Chunk size at which streaming operations poll for cancellation.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// A cooperative cancellation token, cheaply cloneable.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never fires.
    pub fn none() -> Self {
        Self::default()
    }

    /// A token that fires once `deadline` has passed.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
            }),
        }
    }

    /// Fire the token; idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self.inner.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Return [`Error::Cancelled`] if the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
