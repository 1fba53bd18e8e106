//! Exclusivity of purchase attempts across flow instances.
//!
//! A single [`PaymentIntentFlow`](crate::flow::PaymentIntentFlow) never runs
//! two attempts at once. When several flows can buy the same content for the
//! same payer (two purchase cards on one page, two tabs sharing a session),
//! give them a shared [`AttemptRegistry`] and the second attempt is refused
//! while the first is in flight.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use dashmap::DashSet;

/// The (content, payer) pair an attempt is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    /// Content being purchased.
    pub content_id: U256,
    /// Paying account.
    pub payer: Address,
}

/// Shared set of in-flight attempts. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct AttemptRegistry {
    active: Arc<DashSet<AttemptKey>>,
}

impl AttemptRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key`, or returns `None` if an attempt for it is already active.
    ///
    /// The claim is released when the returned guard is dropped.
    #[must_use]
    pub fn try_begin(&self, key: AttemptKey) -> Option<AttemptGuard> {
        self.active.insert(key).then(|| AttemptGuard {
            key,
            active: Arc::clone(&self.active),
        })
    }

    /// Whether an attempt for `key` is in flight.
    #[must_use]
    pub fn is_active(&self, key: &AttemptKey) -> bool {
        self.active.contains(key)
    }

    /// Number of attempts in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no attempt is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Releases an [`AttemptKey`] on drop.
#[derive(Debug)]
pub struct AttemptGuard {
    key: AttemptKey,
    active: Arc<DashSet<AttemptKey>>,
}

impl AttemptGuard {
    /// The claimed key.
    #[must_use]
    pub const fn key(&self) -> &AttemptKey {
        &self.key
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}
