//! Deadlines, cancellation and identity for one call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::CallMetadata;
use crate::error::RpcError;

/// Shared flag signalling that work should stop.
///
/// A child token is cancelled whenever its parent is.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token cancelled together with `self`, but cancellable on
    /// its own without affecting `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Cancels this token and its children.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` once this token or an ancestor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.is_cancelled())
    }
}

/// Context passed alongside every call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    metadata: CallMetadata,
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl CallContext {
    /// Context without deadline, identity or cancellation.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Context expiring `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            ..Self::default()
        }
    }

    /// Rebuilds the context of an inbound request.
    #[must_use]
    pub fn from_metadata(metadata: CallMetadata, cancel: CancelToken) -> Self {
        let deadline = metadata
            .deadline_ms()
            .and_then(|ms| Instant::now().checked_add(Duration::from_millis(ms)));
        Self {
            metadata,
            deadline,
            cancel,
        }
    }

    /// Derives the context of a nested outbound call.
    ///
    /// The child keeps this context's deadline and is cancelled with it, but
    /// carries its own identity.
    #[must_use]
    pub fn child(&self, metadata: CallMetadata) -> Self {
        Self {
            metadata,
            deadline: self.deadline,
            cancel: self.cancel.child(),
        }
    }

    /// Replaces the identity carried by this context.
    #[must_use]
    pub fn with_metadata(mut self, metadata: CallMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns the identity metadata.
    #[must_use]
    pub const fn metadata(&self) -> &CallMetadata {
        &self.metadata
    }

    /// Returns the caller's client identifier, if any.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.metadata.client_id()
    }

    /// Returns the request identifier, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.metadata.request_id()
    }

    /// Returns the absolute deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline, if any.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns the cancellation token.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Returns `true` once the call is cancelled or past its deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Fails fast when the context is already done.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Cancelled`] or [`RpcError::Timeout`].
    pub fn check(&self, method: &str) -> Result<(), RpcError> {
        if self.cancel.is_cancelled() {
            return Err(RpcError::Cancelled {
                method: method.to_owned(),
            });
        }
        if self.remaining().is_some_and(|left| left.is_zero()) {
            return Err(RpcError::Timeout {
                method: method.to_owned(),
                timeout_ms: 0,
            });
        }
        Ok(())
    }
}

pub(super) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
