//! Page ownership directory.
//!
//! Tracks which simulated threads hold a translation for a page. A page with
//! a single owner (or none) does not need a cross-core fence on stores.
//! Entries are never removed for the lifetime of a run.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use crate::cpu::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DirectorySummary {
    pub private_pages: u64,
    pub total_pages: u64,
}

#[derive(Debug, Default)]
pub struct CoherenceDirectory {
    owners: Mutex<HashMap<u64, u64>>,
}

#[inline]
fn single(mask: u64) -> bool {
    mask & mask.wrapping_sub(1) == 0
}

impl CoherenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_owner(&self, page: u64, tid: ThreadId) {
        *self.owners.lock().entry(page).or_default() |= tid.mask();
    }

    pub fn sub_owner(&self, page: u64, tid: ThreadId) {
        if let Some(mask) = self.owners.lock().get_mut(&page) {
            *mask &= !tid.mask();
        }
    }

    /// `tid` gains `installed` and, if a page was displaced, loses `evicted`,
    /// under a single lock acquisition.
    pub fn transfer(&self, installed: u64, evicted: Option<u64>, tid: ThreadId) {
        let mut owners = self.owners.lock();
        *owners.entry(installed).or_default() |= tid.mask();
        if let Some(mask) = evicted.and_then(|page| owners.get_mut(&page)) {
            *mask &= !tid.mask();
        }
    }

    /// True when at most one thread owns `page`.
    pub fn single_owner(&self, page: u64) -> bool {
        single(self.return_owners(page))
    }

    pub fn return_owners(&self, page: u64) -> u64 {
        self.owners.lock().get(&page).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> DirectorySummary {
        let owners = self.owners.lock();
        DirectorySummary {
            private_pages: owners.values().filter(|&&mask| single(mask)).count() as u64,
            total_pages: owners.len() as u64,
        }
    }
}
