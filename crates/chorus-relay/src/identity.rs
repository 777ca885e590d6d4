//! Identity allocation.
//!
//! Each connection gets a random 128-bit token at establishment time.
//! Tokens are never recycled: a reconnecting peer is a new connection
//! with a new identity.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;
use uuid::Uuid;

use crate::types::Identity;

/// Issues process-unique identities.
#[derive(Debug, Default)]
pub struct IdentityAllocator {
    issued: AtomicU64,
}

impl IdentityAllocator {
    /// Create a new allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh identity.
    ///
    /// A UUID v4 rendered in hyphenated form. Reserved tokens are skipped,
    /// although a UUID can never spell one.
    pub fn allocate(&self) -> Identity {
        loop {
            let id = Identity::new(Uuid::new_v4().hyphenated().to_string());
            if id.is_reserved() {
                continue;
            }
            let n = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(identity = %id, issued = n, "Allocated identity");
            return id;
        }
    }

    /// Number of identities issued so far.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}
