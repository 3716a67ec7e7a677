use std::collections::BTreeMap;
use tracing::debug;

use crate::utils::error::{AppError, Result};

/// Target prices the user wants buyers to see, keyed by offer id.
///
/// Scoped to one seller account; switching accounts swaps the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingStore {
    account: String,
    entries: BTreeMap<String, u32>,
}

impl TrackingStore {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn for_account(account: impl Into<String>, entries: BTreeMap<String, u32>) -> Self {
        let mut store = Self::new(account);
        // zero targets can only come from a hand-edited settings file
        store.entries = entries.into_iter().filter(|(_, target)| *target > 0).collect();
        store
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn track(&mut self, offer_id: impl Into<String>, target: u32) -> Result<()> {
        let offer_id = offer_id.into();
        if offer_id.is_empty() {
            return Err(AppError::Validation("Offer id must not be empty".into()));
        }
        if target == 0 {
            return Err(AppError::Validation(format!(
                "Target price for {} must be a positive integer",
                offer_id
            )));
        }
        debug!("Tracking {} at target {}", offer_id, target);
        self.entries.insert(offer_id, target);
        Ok(())
    }

    /// Returns the previous target, if the offer was tracked.
    pub fn untrack(&mut self, offer_id: &str) -> Option<u32> {
        let removed = self.entries.remove(offer_id);
        if removed.is_some() {
            debug!("Stopped tracking {}", offer_id);
        }
        removed
    }

    pub fn target(&self, offer_id: &str) -> Option<u32> {
        self.entries.get(offer_id).copied()
    }

    pub fn contains(&self, offer_id: &str) -> bool {
        self.entries.contains_key(offer_id)
    }

    /// Immutable copy handed to a repricing cycle at its start.
    pub fn snapshot(&self) -> BTreeMap<String, u32> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(offer_id, target)| (offer_id.as_str(), *target))
    }
}
