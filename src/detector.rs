//! New-call detection against the previously observed record set.
//!
//! Drives the "new call" notification and nothing else; extraction gating
//! is the processed set's job. The known set is owned by the session, not
//! held as a global, so concurrent agent sessions cannot bleed into each
//! other.

use std::collections::HashSet;

/// The set of call ids observed on the previous reconciliation pass.
#[derive(Debug, Default)]
pub struct KnownCalls {
    ids: HashSet<String>,
    seeded: bool,
}

impl KnownCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call ids present now but absent from the previous pass.
    ///
    /// Until the first pass has seeded the set, everything is suppressed;
    /// otherwise every record on first load would be reported as new.
    pub fn detect_new(&self, current: &HashSet<String>) -> HashSet<String> {
        if !self.seeded {
            return HashSet::new();
        }
        current.difference(&self.ids).cloned().collect()
    }

    /// Replace (not merge) the known set with the current pass's ids.
    pub fn update(&mut self, current: HashSet<String>) {
        self.ids = current;
        self.seeded = true;
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
