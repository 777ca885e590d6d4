//! Explicit subscription sets.
//!
//! One registry-like structure mapping shared destinations to the identities
//! subscribed to them. Fan-out reads a copied subscriber list, never the live
//! set.

use std::collections::HashSet;
use std::fmt;

use dashmap::DashMap;
use tracing::debug;

use crate::types::Identity;

/// Destination → subscriber identities.
pub struct SubscriptionRegistry {
    subscriptions: DashMap<String, HashSet<Identity>>,
}

impl SubscriptionRegistry {
    /// Create an empty subscription registry.
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
        }
    }

    /// Subscribe an identity. Returns true if it was not already subscribed.
    pub fn subscribe(&self, destination: &str, identity: &Identity) -> bool {
        let added = self
            .subscriptions
            .entry(destination.to_string())
            .or_default()
            .insert(identity.clone());
        debug!(destination, identity = %identity, added, "Subscribe");
        added
    }

    /// Unsubscribe an identity. Returns true if it was subscribed.
    pub fn unsubscribe(&self, destination: &str, identity: &Identity) -> bool {
        let removed = match self.subscriptions.get_mut(destination) {
            Some(mut set) => set.remove(identity),
            None => false,
        };
        // Drop the destination once nobody listens.
        self.subscriptions
            .remove_if(destination, |_, set| set.is_empty());
        debug!(destination, identity = %identity, removed, "Unsubscribe");
        removed
    }

    /// Remove every subscription held by an identity.
    ///
    /// Returns how many destinations it was removed from.
    pub fn unsubscribe_all(&self, identity: &Identity) -> usize {
        let mut removed = 0;
        self.subscriptions.retain(|_, set| {
            if set.remove(identity) {
                removed += 1;
            }
            !set.is_empty()
        });
        removed
    }

    /// Copy of the subscribers of a destination.
    pub fn subscribers(&self, destination: &str) -> Vec<Identity> {
        self.subscriptions
            .get(destination)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Destinations an identity is subscribed to, sorted.
    pub fn destinations_for(&self, identity: &Identity) -> Vec<String> {
        let mut destinations: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().contains(identity))
            .map(|entry| entry.key().clone())
            .collect();
        destinations.sort();
        destinations
    }

    /// Number of destinations with at least one subscriber.
    pub fn destination_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("destination_count", &self.subscriptions.len())
            .finish()
    }
}
