use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    addr::{page_of, Addr, AddressDecoder, PAGE_SIZE},
    config::CacheConfig,
    cpu::ThreadId,
    error::ConfigError,
    replace::{ReplacementPolicy, ReplacementSet, Tag},
};

/// Levels at or above this number are shared by every simulated thread.
pub const FIRST_SHARED_LEVEL: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Load,
    Store,
}

impl AccessType {
    pub const ALL: [AccessType; 2] = [AccessType::Load, AccessType::Store];

    #[inline]
    fn index(self) -> usize {
        match self {
            AccessType::Load => 0,
            AccessType::Store => 1,
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::Load => f.write_str("Load"),
            AccessType::Store => f.write_str("Store"),
        }
    }
}

/// How a level turns an address into a set index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// Indexed by cache line.
    Cache,
    /// Indexed by page number.
    Tlb,
}

/// Index of a level inside a [`Hierarchy`](crate::hierarchy::Hierarchy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelId(pub(crate) usize);

/// Hit/miss counters split by access type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    access: [[u64; 2]; 2],
}

impl Counters {
    #[inline]
    fn record(&mut self, ty: AccessType, hit: bool) {
        self.access[ty.index()][usize::from(hit)] += 1;
    }

    pub fn hits(&self, ty: AccessType) -> u64 {
        self.access[ty.index()][1]
    }

    pub fn misses(&self, ty: AccessType) -> u64 {
        self.access[ty.index()][0]
    }

    pub fn accesses(&self, ty: AccessType) -> u64 {
        self.hits(ty) + self.misses(ty)
    }

    pub fn total_hits(&self) -> u64 {
        AccessType::ALL.iter().map(|&ty| self.hits(ty)).sum()
    }

    pub fn total_misses(&self) -> u64 {
        AccessType::ALL.iter().map(|&ty| self.misses(ty)).sum()
    }

    pub fn total_accesses(&self) -> u64 {
        self.total_hits() + self.total_misses()
    }
}

impl std::ops::AddAssign for Counters {
    fn add_assign(&mut self, rhs: Self) {
        for ty in 0..2 {
            for hit in 0..2 {
                self.access[ty][hit] += rhs.access[ty][hit];
            }
        }
    }
}

/// Address range of a block dropped from a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub addr: u64,
    pub len: u64,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AccessOutcome {
    pub hit: bool,
    /// Whether any missing block was allocated.
    pub allocated: bool,
    pub evicted: SmallVec<[Block; 2]>,
}

/// Storage of one level for one owner: the sets and their counters.
#[derive(Debug)]
pub struct CacheLevelInstance {
    sets: Vec<ReplacementSet>,
    counters: Counters,
    used: bool,
    rng: fastrand::Rng,
}

impl CacheLevelInstance {
    fn new(n_sets: usize, n_ways: usize, policy: ReplacementPolicy, seed: u64) -> Self {
        CacheLevelInstance {
            sets: (0..n_sets)
                .map(|_| ReplacementSet::new(n_ways, policy))
                .collect(),
            counters: Counters::default(),
            used: false,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    #[inline]
    fn record_access(&mut self, ty: AccessType, hit: bool) {
        self.counters.record(ty, hit);
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub fn set(&self, index: usize) -> &ReplacementSet {
        &self.sets[index]
    }

    pub fn resident_blocks(&self) -> usize {
        self.sets.iter().map(|s| s.resident().count()).sum()
    }

    fn clear_stats(&mut self) {
        self.counters = Counters::default();
    }
}

/// Fixed parameters of a level plus the address decoder derived from them.
#[derive(Debug, Clone)]
pub struct CacheGeometry {
    pub name: String,
    pub kind: CacheKind,
    pub level: u32,
    pub size: u64,
    pub line_size: u64,
    pub associativity: u64,
    pub n_sets: u64,
    pub store_allocates: bool,
    pub policy: ReplacementPolicy,
    decoder: AddressDecoder,
}

impl CacheGeometry {
    pub fn new(
        name: &str,
        kind: CacheKind,
        level: u32,
        config: &CacheConfig,
        policy: ReplacementPolicy,
    ) -> Result<Self, ConfigError> {
        let CacheConfig {
            size,
            line_size,
            associativity,
            store_allocates,
            ..
        } = *config;

        if !line_size.is_power_of_two() {
            return Err(ConfigError::LineSize {
                name: name.to_string(),
                line_size,
            });
        }
        if !associativity.is_power_of_two() {
            return Err(ConfigError::Associativity {
                name: name.to_string(),
                associativity,
            });
        }
        let block = line_size * associativity;
        if size == 0 || size % block != 0 {
            return Err(ConfigError::Geometry {
                name: name.to_string(),
                size,
                line_size,
                associativity,
            });
        }
        let n_sets = size / block;
        let decoder = AddressDecoder::new(name, line_size, n_sets)?;

        Ok(CacheGeometry {
            name: name.to_string(),
            kind,
            level,
            size,
            line_size,
            associativity,
            n_sets,
            store_allocates,
            policy,
            decoder,
        })
    }

    #[inline]
    pub fn is_private(&self) -> bool {
        self.level < FIRST_SHARED_LEVEL
    }

    #[inline]
    pub fn split_address(&self, addr: u64) -> Addr {
        self.decoder.split(addr)
    }

    #[inline]
    pub fn crosses_line(&self, addr: u64, size: u64) -> bool {
        self.decoder.crosses_line(addr, size)
    }

    #[inline]
    fn allocates(&self, ty: AccessType) -> bool {
        ty == AccessType::Load || self.store_allocates
    }

    /// Lookup plus allocation of one decoded block, no counter update.
    fn probe(
        &self,
        inst: &mut CacheLevelInstance,
        iaddr: u64,
        split: Addr,
        block_len: u64,
        ty: AccessType,
        outcome: &mut AccessOutcome,
    ) -> bool {
        let CacheLevelInstance { sets, rng, .. } = inst;
        let set = &mut sets[split.set];
        let hit = set.find(split.tag);

        // on miss, loads always allocate, stores optionally
        if !hit && self.allocates(ty) {
            outcome.allocated = true;
            if let Some(evicted) = set.replace(split.tag, rng) {
                log::trace!(
                    "{}: {:#x} (ip {:#x}) evicts tag {:#x} from set {}",
                    self.name,
                    split.tag,
                    iaddr,
                    evicted,
                    split.set
                );
                outcome.evicted.push(Block {
                    addr: evicted * block_len,
                    len: block_len,
                });
            }
        }
        hit
    }

    fn access_single_line(
        &self,
        inst: &mut CacheLevelInstance,
        iaddr: u64,
        addr: u64,
        ty: AccessType,
    ) -> AccessOutcome {
        inst.used = true;
        let mut outcome = AccessOutcome::default();
        let split = self.decoder.split(addr);
        outcome.hit = self.probe(inst, iaddr, split, self.line_size, ty, &mut outcome);
        inst.record_access(ty, outcome.hit);
        outcome
    }

    fn access(
        &self,
        inst: &mut CacheLevelInstance,
        iaddr: u64,
        addr: u64,
        size: u64,
        ty: AccessType,
    ) -> AccessOutcome {
        inst.used = true;
        let mut outcome = AccessOutcome::default();
        let mut all_hit = true;
        for line in self.decoder.lines(addr, size) {
            let split = self.decoder.split(line);
            all_hit &= self.probe(inst, iaddr, split, self.line_size, ty, &mut outcome);
        }
        // a multi-line access counts once, as a hit only if every line hit
        outcome.hit = all_hit;
        inst.record_access(ty, all_hit);
        outcome
    }

    fn access_page(&self, inst: &mut CacheLevelInstance, addr: u64, ty: AccessType) -> AccessOutcome {
        inst.used = true;
        let mut outcome = AccessOutcome::default();
        let split = self.decoder.split_page(addr);
        outcome.hit = self.probe(inst, addr, split, PAGE_SIZE, ty, &mut outcome);
        inst.record_access(ty, outcome.hit);
        outcome
    }

    fn split_for_kind(&self, addr: u64) -> Addr {
        match self.kind {
            CacheKind::Cache => self.decoder.split(addr),
            CacheKind::Tlb => self.decoder.split_page(addr),
        }
    }

    fn blocks_of(&self, block: Block) -> impl Iterator<Item = u64> {
        let step = match self.kind {
            CacheKind::Cache => self.line_size,
            CacheKind::Tlb => PAGE_SIZE,
        };
        let first = block.addr & !(step - 1);
        let end = block.addr.saturating_add(block.len.max(1));
        let mut next = Some(first);
        std::iter::from_fn(move || {
            let cur = next?;
            next = cur.checked_add(step).filter(|&n| n < end);
            Some(cur)
        })
    }

    /// Frees every block of this level overlapping `block`. Returns how many
    /// were resident.
    fn evict(&self, inst: &mut CacheLevelInstance, block: Block) -> usize {
        let mut freed = 0;
        for addr in self.blocks_of(block) {
            let split = self.split_for_kind(addr);
            if inst.sets[split.set].free(split.tag) {
                freed += 1;
            }
        }
        freed
    }

    fn contains(&self, inst: &CacheLevelInstance, addr: u64) -> bool {
        let split = self.split_for_kind(addr);
        inst.sets[split.set].contains(split.tag)
    }
}

#[derive(Debug)]
enum Storage {
    Private(Vec<CacheLevelInstance>),
    Shared(Mutex<CacheLevelInstance>),
}

/// One level of the hierarchy: either one instance per simulated thread
/// (private levels) or a single instance behind a lock (shared levels).
#[derive(Debug)]
pub struct Cache {
    geometry: CacheGeometry,
    storage: Storage,
    prev: Vec<LevelId>,
    threads: usize,
}

impl Cache {
    pub fn new(geometry: CacheGeometry, threads: usize, seed: u64) -> Self {
        let n_sets = geometry.n_sets as usize;
        let n_ways = geometry.associativity as usize;
        let policy = geometry.policy;
        let level_seed = seed ^ (u64::from(geometry.level) << 32);
        let storage = if geometry.is_private() {
            Storage::Private(
                (0..threads)
                    .map(|t| CacheLevelInstance::new(n_sets, n_ways, policy, level_seed + t as u64))
                    .collect(),
            )
        } else {
            Storage::Shared(Mutex::new(CacheLevelInstance::new(
                n_sets, n_ways, policy, level_seed,
            )))
        };
        log::debug!(
            "{}: L{} {} size={} line={} ways={} sets={} {}",
            geometry.name,
            geometry.level,
            if geometry.is_private() { "private" } else { "shared" },
            geometry.size,
            geometry.line_size,
            geometry.associativity,
            geometry.n_sets,
            geometry.policy,
        );
        Cache {
            geometry,
            storage,
            prev: Vec::new(),
            threads,
        }
    }

    pub fn geometry(&self) -> &CacheGeometry {
        &self.geometry
    }

    pub fn name(&self) -> &str {
        &self.geometry.name
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_private(&self) -> bool {
        self.geometry.is_private()
    }

    pub fn split_address(&self, addr: u64) -> Addr {
        self.geometry.split_address(addr)
    }

    /// Registers a level closer to the processor that must drop blocks this
    /// level evicts.
    pub fn set_prev(&mut self, prev: LevelId) {
        if !self.prev.contains(&prev) {
            self.prev.push(prev);
        }
    }

    pub fn prev(&self) -> &[LevelId] {
        &self.prev
    }

    /// The instance serving `tid`, marked as used.
    pub fn get_instance(&mut self, tid: ThreadId) -> &mut CacheLevelInstance {
        let inst = match &mut self.storage {
            Storage::Private(instances) => &mut instances[tid.index()],
            Storage::Shared(inst) => inst.get_mut(),
        };
        inst.used = true;
        inst
    }

    pub fn view(&mut self, tid: ThreadId) -> LevelView<'_> {
        let slot = match &mut self.storage {
            Storage::Private(instances) => Slot::Private(&mut instances[tid.index()]),
            Storage::Shared(inst) => Slot::Shared(inst),
        };
        LevelView {
            geometry: &self.geometry,
            prev: &self.prev,
            slot,
        }
    }

    /// One view per simulated thread, in thread order.
    pub(crate) fn thread_views(&mut self) -> Vec<LevelView<'_>> {
        let Cache {
            geometry,
            storage,
            prev,
            threads,
        } = self;
        let geometry: &CacheGeometry = geometry;
        let prev: &[LevelId] = prev;
        match storage {
            Storage::Private(instances) => instances
                .iter_mut()
                .map(|inst| LevelView {
                    geometry,
                    prev,
                    slot: Slot::Private(inst),
                })
                .collect(),
            Storage::Shared(inst) => {
                let inst: &Mutex<CacheLevelInstance> = inst;
                (0..*threads)
                    .map(|_| LevelView {
                        geometry,
                        prev,
                        slot: Slot::Shared(inst),
                    })
                    .collect()
            }
        }
    }

    pub fn access(
        &mut self,
        iaddr: u64,
        addr: u64,
        size: u64,
        ty: AccessType,
        tid: ThreadId,
    ) -> AccessOutcome {
        self.view(tid).access(iaddr, addr, size, ty)
    }

    pub fn access_single_line(
        &mut self,
        iaddr: u64,
        addr: u64,
        ty: AccessType,
        tid: ThreadId,
    ) -> AccessOutcome {
        self.view(tid).access_single_line(iaddr, addr, ty)
    }

    pub fn access_page(&mut self, addr: u64, ty: AccessType, tid: ThreadId) -> AccessOutcome {
        self.view(tid).access_page(addr, ty)
    }

    /// Drops the block holding `addr` for `tid`, if present.
    pub fn evict(&mut self, addr: u64, tid: ThreadId) -> bool {
        self.view(tid).evict(Block { addr, len: 1 }) > 0
    }

    pub fn contains(&self, addr: u64, tid: ThreadId) -> bool {
        match &self.storage {
            Storage::Private(instances) => self.geometry.contains(&instances[tid.index()], addr),
            Storage::Shared(inst) => self.geometry.contains(&inst.lock(), addr),
        }
    }

    pub fn counters(&self, tid: ThreadId) -> Counters {
        match &self.storage {
            Storage::Private(instances) => instances[tid.index()].counters,
            Storage::Shared(inst) => inst.lock().counters,
        }
    }

    pub fn is_used(&self, tid: ThreadId) -> bool {
        match &self.storage {
            Storage::Private(instances) => instances[tid.index()].used,
            Storage::Shared(inst) => inst.lock().used,
        }
    }

    /// Counters summed over every instance; a shared level has only one.
    pub fn counters_all(&self) -> Counters {
        match &self.storage {
            Storage::Private(instances) => {
                let mut sum = Counters::default();
                for inst in instances {
                    sum += inst.counters;
                }
                sum
            }
            Storage::Shared(inst) => inst.lock().counters,
        }
    }

    pub fn hits(&self, ty: AccessType, tid: ThreadId) -> u64 {
        self.counters(tid).hits(ty)
    }

    pub fn misses(&self, ty: AccessType, tid: ThreadId) -> u64 {
        self.counters(tid).misses(ty)
    }

    pub fn accesses(&self, ty: AccessType, tid: ThreadId) -> u64 {
        self.counters(tid).accesses(ty)
    }

    pub fn hits_all(&self, ty: AccessType) -> u64 {
        self.counters_all().hits(ty)
    }

    pub fn misses_all(&self, ty: AccessType) -> u64 {
        self.counters_all().misses(ty)
    }

    pub fn accesses_all(&self, ty: AccessType) -> u64 {
        self.counters_all().accesses(ty)
    }

    pub fn clear_stats(&mut self) {
        match &mut self.storage {
            Storage::Private(instances) => instances.iter_mut().for_each(|i| i.clear_stats()),
            Storage::Shared(inst) => inst.get_mut().clear_stats(),
        }
    }
}

#[derive(Debug)]
enum Slot<'a> {
    Private(&'a mut CacheLevelInstance),
    Shared(&'a Mutex<CacheLevelInstance>),
}

/// A level as seen by one simulated thread.
///
/// Private instances are borrowed mutably and need no locking. Shared
/// instances are locked for the duration of a single call.
#[derive(Debug)]
pub struct LevelView<'a> {
    geometry: &'a CacheGeometry,
    prev: &'a [LevelId],
    slot: Slot<'a>,
}

impl<'a> LevelView<'a> {
    #[inline]
    fn with_instance<T>(&mut self, f: impl FnOnce(&CacheGeometry, &mut CacheLevelInstance) -> T) -> T {
        match &mut self.slot {
            Slot::Private(inst) => f(self.geometry, &mut **inst),
            Slot::Shared(inst) => f(self.geometry, &mut *inst.lock()),
        }
    }

    pub fn geometry(&self) -> &'a CacheGeometry {
        self.geometry
    }

    pub fn prev(&self) -> &'a [LevelId] {
        self.prev
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.slot, Slot::Shared(_))
    }

    pub fn access(&mut self, iaddr: u64, addr: u64, size: u64, ty: AccessType) -> AccessOutcome {
        self.with_instance(|g, inst| g.access(inst, iaddr, addr, size, ty))
    }

    pub fn access_single_line(&mut self, iaddr: u64, addr: u64, ty: AccessType) -> AccessOutcome {
        self.with_instance(|g, inst| g.access_single_line(inst, iaddr, addr, ty))
    }

    pub fn access_page(&mut self, addr: u64, ty: AccessType) -> AccessOutcome {
        self.with_instance(|g, inst| g.access_page(inst, addr, ty))
    }

    pub fn evict(&mut self, block: Block) -> usize {
        self.with_instance(|g, inst| g.evict(inst, block))
    }

    pub fn contains(&mut self, addr: u64) -> bool {
        self.with_instance(|g, inst| g.contains(inst, addr))
    }
}

/// Page a TLB outcome's evicted block refers to.
pub(crate) fn evicted_page(outcome: &AccessOutcome) -> Option<Tag> {
    outcome.evicted.first().map(|b| page_of(b.addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const T0: ThreadId = ThreadId::new_unchecked(0);
    const T1: ThreadId = ThreadId::new_unchecked(1);

    fn config(size: u64, line_size: u64, associativity: u64) -> CacheConfig {
        CacheConfig {
            enabled: true,
            size,
            line_size,
            associativity,
            store_allocates: true,
        }
    }

    fn cache(level: u32, cfg: &CacheConfig, threads: usize) -> Cache {
        let geometry =
            CacheGeometry::new("test", CacheKind::Cache, level, cfg, ReplacementPolicy::Lru).unwrap();
        Cache::new(geometry, threads, 0)
    }

    fn assert_consistent(c: &Cache, tid: ThreadId) {
        let counters = c.counters(tid);
        for ty in AccessType::ALL {
            assert_eq!(counters.hits(ty) + counters.misses(ty), counters.accesses(ty));
        }
        assert_eq!(
            counters.accesses(AccessType::Load) + counters.accesses(AccessType::Store),
            counters.total_accesses()
        );
    }

    #[test]
    fn geometry_errors() {
        let err = |cfg: CacheConfig| {
            CacheGeometry::new("bad", CacheKind::Cache, 1, &cfg, ReplacementPolicy::Lru).unwrap_err()
        };
        assert!(matches!(err(config(32768, 48, 4)), ConfigError::LineSize { .. }));
        assert!(matches!(err(config(32768, 64, 0)), ConfigError::Associativity { .. }));
        assert!(matches!(err(config(32768, 64, 3)), ConfigError::Associativity { .. }));
        assert!(matches!(err(config(1000, 64, 4)), ConfigError::Geometry { .. }));
        assert!(matches!(err(config(0, 64, 4)), ConfigError::Geometry { .. }));
        assert!(matches!(err(config(3 * 256, 64, 4)), ConfigError::SetCount { sets: 3, .. }));
    }

    #[test]
    fn derived_geometry() {
        let c = cache(1, &config(32 * 1024, 64, 4), 1);
        assert_eq!(c.geometry().n_sets, 128);
        assert!(c.is_private());
        assert_eq!(c.split_address(0x1040).set, 0x41);
        assert!(!cache(3, &config(32 * 1024, 64, 4), 4).is_private());
    }

    #[test]
    fn streaming_loads_all_miss() {
        let mut c = cache(1, &config(32 * 1024, 64, 4), 1);
        for i in 0..1000u64 {
            let outcome = c.access_single_line(0, i * 64, AccessType::Load, T0);
            assert!(!outcome.hit);
        }
        assert_eq!(c.accesses(AccessType::Load, T0), 1000);
        assert_eq!(c.misses(AccessType::Load, T0), 1000);
        assert_eq!(c.hits(AccessType::Load, T0), 0);
        assert_consistent(&c, T0);
    }

    #[test]
    fn repeated_load_hits() {
        let mut c = cache(1, &config(32 * 1024, 64, 4), 1);
        for _ in 0..10_000 {
            c.access(0x400, 0x1000, 8, AccessType::Load, T0);
        }
        assert_eq!(c.misses(AccessType::Load, T0), 1);
        assert_eq!(c.hits(AccessType::Load, T0), 9_999);
        assert_consistent(&c, T0);
    }

    #[test]
    fn multi_line_access_counts_once() {
        let mut c = cache(1, &config(32 * 1024, 64, 4), 1);
        // warm the first line only
        assert!(!c.access_single_line(0, 0x1000, AccessType::Load, T0).hit);
        let outcome = c.access(0, 0x103c, 8, AccessType::Load, T0);
        assert!(!outcome.hit);
        let counters = c.counters(T0);
        assert_eq!(counters.hits(AccessType::Load), 0);
        assert_eq!(counters.misses(AccessType::Load), 2);
        // both lines were allocated
        assert!(c.contains(0x1000, T0));
        assert!(c.contains(0x1040, T0));
        assert!(c.access(0, 0x103c, 8, AccessType::Load, T0).hit);
        assert_consistent(&c, T0);
    }

    #[test]
    fn store_no_allocate() {
        let mut cfg = config(1024, 64, 2);
        cfg.store_allocates = false;
        let mut c = cache(1, &cfg, 1);
        assert!(!c.access_single_line(0, 0x80, AccessType::Store, T0).hit);
        assert!(!c.access_single_line(0, 0x80, AccessType::Store, T0).hit);
        assert!(!c.access_single_line(0, 0x80, AccessType::Load, T0).hit);
        assert!(c.access_single_line(0, 0x80, AccessType::Store, T0).hit);
        assert_eq!(c.misses(AccessType::Store, T0), 2);
        assert_eq!(c.hits(AccessType::Store, T0), 1);
    }

    #[test]
    fn eviction_is_reported() {
        // direct mapped, two sets
        let mut c = cache(1, &config(128, 64, 1), 1);
        assert!(c.access_single_line(0, 0x000, AccessType::Load, T0).evicted.is_empty());
        let outcome = c.access_single_line(0, 0x080, AccessType::Load, T0);
        assert_eq!(outcome.evicted.as_slice(), &[Block { addr: 0, len: 64 }]);
    }

    #[test]
    fn private_instances_are_independent() {
        let mut c = cache(2, &config(4096, 64, 4), 2);
        c.access_single_line(0, 0x40, AccessType::Load, T0);
        assert!(c.contains(0x40, T0));
        assert!(!c.contains(0x40, T1));
        assert!(c.is_used(T0));
        assert!(!c.is_used(T1));
        assert_eq!(c.accesses_all(AccessType::Load), 1);
    }

    #[test]
    fn shared_instance_is_common() {
        let mut c = cache(3, &config(4096, 64, 4), 2);
        c.access_single_line(0, 0x40, AccessType::Load, T0);
        assert!(c.access_single_line(0, 0x40, AccessType::Load, T1).hit);
        assert_eq!(c.counters(T0), c.counters(T1));
        assert_eq!(c.accesses_all(AccessType::Load), 2);
    }

    #[test]
    fn page_access_uses_page_number() {
        let geometry = CacheGeometry::new(
            "dtlb",
            CacheKind::Tlb,
            1,
            &config(16 * 4096, 4096, 4),
            ReplacementPolicy::Lru,
        )
        .unwrap();
        let mut tlb = Cache::new(geometry, 1, 0);
        assert!(!tlb.access_page(0x1234, AccessType::Load, T0).hit);
        assert!(tlb.access_page(0x1ff8, AccessType::Store, T0).hit);
        assert!(!tlb.access_page(0x2000, AccessType::Load, T0).hit);
        assert!(tlb.contains(0x1000, T0));
        assert!(tlb.evict(0x1abc, T0));
        assert!(!tlb.contains(0x1000, T0));
    }

    #[test]
    fn evict_range_covers_smaller_lines() {
        let mut c = cache(1, &config(4096, 32, 4), 1);
        c.access_single_line(0, 0x100, AccessType::Load, T0);
        c.access_single_line(0, 0x120, AccessType::Load, T0);
        c.access_single_line(0, 0x140, AccessType::Load, T0);
        let freed = c.view(T0).evict(Block { addr: 0x100, len: 64 });
        assert_eq!(freed, 2);
        assert!(!c.contains(0x100, T0));
        assert!(!c.contains(0x120, T0));
        assert!(c.contains(0x140, T0));
    }

    #[test]
    fn evict_last_line_of_address_space() {
        let top = u64::MAX & !63;
        let mut c = cache(2, &config(128, 64, 1), 1);
        c.access_single_line(0, top, AccessType::Load, T0);
        assert_eq!(c.view(T0).evict(Block { addr: top, len: 64 }), 1);
        assert!(!c.contains(top, T0));

        // a conflicting fill reports the top line as evicted
        c.access_single_line(0, top, AccessType::Load, T0);
        let outcome = c.access_single_line(0, top - 128, AccessType::Load, T0);
        assert_eq!(outcome.evicted.as_slice(), &[Block { addr: top, len: 64 }]);
    }

    #[test]
    fn evict_last_page_of_address_space() {
        let geometry = CacheGeometry::new(
            "utlb",
            CacheKind::Tlb,
            2,
            &config(4 * 4096, 4096, 4),
            ReplacementPolicy::Lru,
        )
        .unwrap();
        let mut tlb = Cache::new(geometry, 1, 0);
        tlb.access_page(u64::MAX, AccessType::Load, T0);
        let top = u64::MAX & !4095;
        assert_eq!(tlb.view(T0).evict(Block { addr: top, len: 4096 }), 1);
        assert!(!tlb.contains(u64::MAX, T0));
    }

    #[test]
    fn get_instance_marks_used() {
        let mut c = cache(2, &config(4096, 64, 4), 2);
        assert!(!c.is_used(T1));
        let inst = c.get_instance(T1);
        assert!(inst.is_used());
        assert_eq!(inst.resident_blocks(), 0);
        assert!(c.is_used(T1));
        assert!(!c.is_used(T0));

        let mut shared = cache(3, &config(4096, 64, 4), 2);
        shared.get_instance(T0);
        assert!(shared.is_used(T1));
    }

    #[test]
    fn clear_stats_keeps_contents() {
        let mut c = cache(1, &config(4096, 64, 4), 1);
        c.access_single_line(0, 0x40, AccessType::Load, T0);
        c.clear_stats();
        assert_eq!(c.counters(T0), Counters::default());
        assert!(c.access_single_line(0, 0x40, AccessType::Load, T0).hit);
    }
}
