use serde::Serialize;

use crate::{
    cache::{AccessType, Cache, CacheKind, Counters},
    coherence::DirectorySummary,
    cpu::ThreadId,
    pages::{PageWalks, Region},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TypeStats {
    pub hits: u64,
    pub misses: u64,
    pub accesses: u64,
    /// `None` when there were no accesses.
    pub hit_rate: Option<f64>,
}

impl TypeStats {
    fn new(hits: u64, misses: u64) -> Self {
        let accesses = hits + misses;
        TypeStats {
            hits,
            misses,
            accesses,
            hit_rate: (accesses > 0).then(|| hits as f64 / accesses as f64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterStats {
    pub load: TypeStats,
    pub store: TypeStats,
    pub total: TypeStats,
    /// Misses per thousand instructions.
    pub mpki: Option<f64>,
}

impl CounterStats {
    pub fn new(counters: &Counters, instructions: u64) -> Self {
        let ty = |ty| TypeStats::new(counters.hits(ty), counters.misses(ty));
        let misses = counters.total_misses();
        CounterStats {
            load: ty(AccessType::Load),
            store: ty(AccessType::Store),
            total: TypeStats::new(counters.total_hits(), misses),
            mpki: (instructions > 0).then(|| 1000.0 * misses as f64 / instructions as f64),
        }
    }

    pub fn get(&self, ty: AccessType) -> &TypeStats {
        match ty {
            AccessType::Load => &self.load,
            AccessType::Store => &self.store,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadStats {
    pub thread: ThreadId,
    #[serde(flatten)]
    pub counters: CounterStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelStats {
    pub name: String,
    pub kind: CacheKind,
    pub level: u32,
    pub shared: bool,
    pub size: u64,
    pub line_size: u64,
    pub associativity: u64,
    pub sets: u64,
    #[serde(flatten)]
    pub all: CounterStats,
    /// Only threads that touched the level.
    pub per_thread: Vec<ThreadStats>,
}

impl LevelStats {
    pub fn new(cache: &Cache, instructions: u64) -> Self {
        let geometry = cache.geometry();
        let per_thread = if cache.is_private() {
            (0..cache.threads())
                .map(ThreadId::new_unchecked)
                .filter(|&tid| cache.is_used(tid))
                .map(|thread| ThreadStats {
                    thread,
                    counters: CounterStats::new(&cache.counters(thread), instructions),
                })
                .collect()
        } else {
            Vec::new()
        };
        LevelStats {
            name: geometry.name.clone(),
            kind: geometry.kind,
            level: geometry.level,
            shared: !cache.is_private(),
            size: geometry.size,
            line_size: geometry.line_size,
            associativity: geometry.associativity,
            sets: geometry.n_sets,
            all: CounterStats::new(&cache.counters_all(), instructions),
            per_thread,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FenceStats {
    pub elided: u64,
    pub executed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimStats {
    pub instructions: u64,
    pub page_walks: u64,
    pub fences: FenceStats,
    pub levels: Vec<LevelStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<DirectorySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<Region>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_region_kib: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hot_walks: Option<Vec<PageWalks>>,
}

impl SimStats {
    pub fn level(&self, name: &str) -> Option<&LevelStats> {
        self.levels.iter().find(|l| l.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_accesses_have_no_rate() {
        let stats = CounterStats::new(&Counters::default(), 0);
        assert_eq!(stats.total.accesses, 0);
        assert_eq!(stats.total.hit_rate, None);
        assert_eq!(stats.mpki, None);
    }

    #[test]
    fn rates() {
        let s = TypeStats::new(3, 1);
        assert_eq!(s.accesses, 4);
        assert_eq!(s.hit_rate, Some(0.75));
    }
}
