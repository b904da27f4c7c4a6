//! Page-level bookkeeping: touched address-space regions and page walks.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::addr::{page_of, PAGE_SIZE};

const KIB: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub start: u64,
    /// Last byte of the region, inclusive.
    pub end: u64,
    pub size_kib: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWalks {
    pub page: u64,
    pub walks: u64,
}

#[derive(Debug, Default)]
pub struct PageTracker {
    active: BTreeSet<u64>,
    walks: BTreeMap<u64, u64>,
}

impl PageTracker {
    pub fn touch(&mut self, addr: u64) {
        self.active.insert(page_of(addr));
    }

    pub fn record_walk(&mut self, addr: u64) {
        *self.walks.entry(page_of(addr)).or_default() += 1;
    }

    pub fn active_pages(&self) -> usize {
        self.active.len()
    }

    pub fn total_walks(&self) -> u64 {
        self.walks.values().sum()
    }

    /// Runs of consecutive touched pages, as byte address ranges.
    pub fn regions(&self) -> Vec<Region> {
        let mut regions = Vec::new();
        let mut pages = self.active.iter().copied();
        let Some(first) = pages.next() else {
            return regions;
        };
        let (mut start, mut last) = (first, first);
        let mut close = |start: u64, last: u64| {
            let pages = last - start + 1;
            regions.push(Region {
                start: start * PAGE_SIZE,
                end: last * PAGE_SIZE + (PAGE_SIZE - 1),
                size_kib: pages * (PAGE_SIZE / KIB),
            });
        };
        for page in pages {
            if page != last + 1 {
                close(start, last);
                start = page;
            }
            last = page;
        }
        close(start, last);
        regions
    }

    pub fn average_region_kib(&self) -> Option<f64> {
        let regions = self.regions();
        let total: u64 = regions.iter().map(|r| r.size_kib).sum();
        (!regions.is_empty()).then(|| total as f64 / regions.len() as f64)
    }

    /// The `n` pages that needed the most walks, most walked first.
    pub fn hot_walks(&self, n: usize) -> Vec<PageWalks> {
        let mut walks: Vec<PageWalks> = self
            .walks
            .iter()
            .map(|(&page, &walks)| PageWalks { page, walks })
            .collect();
        walks.sort_by(|a, b| b.walks.cmp(&a.walks).then(a.page.cmp(&b.page)));
        walks.truncate(n);
        walks
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.walks.clear();
    }
}
