//! Lock-free channel identifier allocation.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::BrokerError;
use crate::frame::ChannelId;

/// Hands out unique channel identifiers for one session.
///
/// Identifiers start at 1 and increase monotonically; 0 stays reserved for
/// [`ChannelId::CONTROL`]. Safe to call from any number of threads.
#[derive(Debug)]
pub struct ChannelAllocator {
    next: AtomicU32,
}

impl ChannelAllocator {
    /// Creates an allocator whose first identifier is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Returns the next unused identifier.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Exhausted`] once the identifier space is used
    /// up.
    pub fn allocate(&self) -> Result<ChannelId, BrokerError> {
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                next.checked_add(1)
            })
            .map(ChannelId::new)
            .map_err(|_| BrokerError::Exhausted)
    }

    #[cfg(test)]
    pub(crate) const fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }
}

impl Default for ChannelAllocator {
    fn default() -> Self {
        Self::new()
    }
}
