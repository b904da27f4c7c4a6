//! Composition of caches and TLBs into a memory hierarchy.
//!
//! Instruction fetches walk `il1 -> ul2 -> ul3` and `itlbm -> itlb1 -> utlb2`,
//! data accesses walk `dl1 -> ul2 -> ul3` and `dtlbm -> dtlb1 -> utlb2`,
//! stopping at the first hit. A miss in `utlb2` is a page-table walk, a miss
//! in the last cache level goes to memory.
//!
//! Private levels are split into one [`Core`] view per simulated thread with
//! [`Hierarchy::cores`]; the views can run on separate threads without any
//! locking of private state. Shared levels lock for one access at a time.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::{
    addr::page_of,
    cache::{evicted_page, AccessType, Block, Cache, CacheGeometry, CacheKind, LevelId, LevelView},
    coherence::CoherenceDirectory,
    config::{CacheConfig, SimConfig},
    cpu::{Cpu, ThreadId},
    error::Error,
    pages::PageTracker,
    stats::{FenceStats, LevelStats, SimStats},
    trace::Event,
};

/// Number of most-walked pages kept in the report.
const HOT_WALKS: usize = 16;

const ROLES: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Il1,
    Dl1,
    Ul2,
    Ul3,
    Itlbm,
    Dtlbm,
    Itlb1,
    Dtlb1,
    Utlb2,
}

impl Role {
    pub const ALL: [Role; ROLES] = [
        Role::Il1,
        Role::Dl1,
        Role::Ul2,
        Role::Ul3,
        Role::Itlbm,
        Role::Dtlbm,
        Role::Itlb1,
        Role::Dtlb1,
        Role::Utlb2,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Role::Il1 => "il1",
            Role::Dl1 => "dl1",
            Role::Ul2 => "ul2",
            Role::Ul3 => "ul3",
            Role::Itlbm => "itlbm",
            Role::Dtlbm => "dtlbm",
            Role::Itlb1 => "itlb1",
            Role::Dtlb1 => "dtlb1",
            Role::Utlb2 => "utlb2",
        }
    }

    pub fn kind(self) -> CacheKind {
        match self {
            Role::Il1 | Role::Dl1 | Role::Ul2 | Role::Ul3 => CacheKind::Cache,
            _ => CacheKind::Tlb,
        }
    }

    pub fn level(self) -> u32 {
        match self {
            Role::Il1 | Role::Dl1 | Role::Itlbm | Role::Dtlbm | Role::Itlb1 | Role::Dtlb1 => 1,
            Role::Ul2 | Role::Utlb2 => 2,
            Role::Ul3 => 3,
        }
    }

    /// Levels that must drop what this level evicts. Each chain lists
    /// candidates nearest first; the first enabled one is linked.
    fn prev_chains(self) -> &'static [&'static [Role]] {
        match self {
            Role::Ul2 => &[&[Role::Il1], &[Role::Dl1]],
            Role::Ul3 => &[&[Role::Ul2, Role::Il1], &[Role::Ul2, Role::Dl1]],
            Role::Itlb1 => &[&[Role::Itlbm]],
            Role::Dtlb1 => &[&[Role::Dtlbm]],
            Role::Utlb2 => &[&[Role::Itlb1, Role::Itlbm], &[Role::Dtlb1, Role::Dtlbm]],
            _ => &[],
        }
    }

    fn config(self, config: &SimConfig) -> Option<&CacheConfig> {
        let levels = &config.levels;
        match self {
            Role::Il1 => levels.il1.as_ref(),
            Role::Dl1 => levels.dl1.as_ref(),
            Role::Ul2 => levels.ul2.as_ref(),
            Role::Ul3 => levels.ul3.as_ref(),
            Role::Itlbm => levels.itlbm.as_ref(),
            Role::Dtlbm => levels.dtlbm.as_ref(),
            Role::Itlb1 => levels.itlb1.as_ref(),
            Role::Dtlb1 => levels.dtlb1.as_ref(),
            Role::Utlb2 => levels.utlb2.as_ref(),
        }
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
struct Roles([Option<LevelId>; ROLES]);

impl Roles {
    #[inline]
    fn get(&self, role: Role) -> Option<LevelId> {
        self.0[role.index()]
    }
}

/// State shared by every simulated thread besides the shared cache levels.
#[derive(Debug, Default)]
struct SharedState {
    directory: Option<CoherenceDirectory>,
    pages: Option<Mutex<PageTracker>>,
    track_walks: bool,
    instructions: AtomicU64,
    page_walks: AtomicU64,
    elided_fences: AtomicU64,
    executed_fences: AtomicU64,
}

#[derive(Debug)]
pub struct Hierarchy {
    levels: Vec<Cache>,
    roles: Roles,
    shared: SharedState,
    threads: usize,
}

impl Hierarchy {
    pub fn new(config: &SimConfig) -> Result<Self, Error> {
        config.validate()?;

        let mut levels = Vec::new();
        let mut roles = Roles::default();
        for role in Role::ALL {
            let Some(cfg) = role.config(config).filter(|c| c.enabled) else {
                continue;
            };
            let geometry =
                CacheGeometry::new(role.name(), role.kind(), role.level(), cfg, config.replacement)?;
            roles.0[role.index()] = Some(LevelId(levels.len()));
            levels.push(Cache::new(geometry, config.threads, config.seed));
        }

        for role in Role::ALL {
            let Some(id) = roles.get(role) else {
                continue;
            };
            for chain in role.prev_chains() {
                if let Some(prev) = chain.iter().find_map(|&r| roles.get(r)) {
                    levels[id.0].set_prev(prev);
                }
            }
        }

        let track_pages = config.track_pages || config.track_page_walks;
        let shared = SharedState {
            directory: config.coherence.then(CoherenceDirectory::new),
            pages: track_pages.then(|| Mutex::new(PageTracker::default())),
            track_walks: config.track_page_walks,
            ..SharedState::default()
        };

        log::info!(
            "built hierarchy with {} levels for {} threads ({})",
            levels.len(),
            config.threads,
            config.replacement
        );

        Ok(Hierarchy {
            levels,
            roles,
            shared,
            threads: config.threads,
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Validates a raw thread id coming from the event source.
    pub fn thread(&self, tid: usize) -> Result<ThreadId, Error> {
        if tid < self.threads {
            Ok(ThreadId::new_unchecked(tid))
        } else {
            Err(Error::ThreadOutOfRange {
                tid,
                threads: self.threads,
            })
        }
    }

    pub fn cache(&self, role: Role) -> Option<&Cache> {
        self.roles.get(role).map(|id| &self.levels[id.0])
    }

    pub fn cache_mut(&mut self, role: Role) -> Option<&mut Cache> {
        self.roles.get(role).map(|id| &mut self.levels[id.0])
    }

    pub fn level(&self, id: LevelId) -> &Cache {
        &self.levels[id.0]
    }

    /// Enabled levels in construction order.
    pub fn cache_levels(&self) -> impl Iterator<Item = &Cache> {
        self.levels.iter()
    }

    pub fn directory(&self) -> Option<&CoherenceDirectory> {
        self.shared.directory.as_ref()
    }

    pub fn instructions(&self) -> u64 {
        self.shared.instructions.load(Ordering::Relaxed)
    }

    pub fn core(&mut self, tid: ThreadId) -> Core<'_> {
        Core {
            cpu: Cpu::new(tid),
            levels: self.levels.iter_mut().map(|c| c.view(tid)).collect(),
            roles: &self.roles,
            shared: &self.shared,
        }
    }

    /// One view per simulated thread, indexed by thread id.
    pub fn cores(&mut self) -> Vec<Core<'_>> {
        let mut views: Vec<Vec<LevelView<'_>>> = (0..self.threads)
            .map(|_| Vec::with_capacity(self.levels.len()))
            .collect();
        for cache in &mut self.levels {
            for (core, view) in views.iter_mut().zip(cache.thread_views()) {
                core.push(view);
            }
        }
        let roles = &self.roles;
        let shared = &self.shared;
        views
            .into_iter()
            .enumerate()
            .map(|(tid, levels)| Core {
                cpu: Cpu::new(ThreadId::new_unchecked(tid)),
                levels,
                roles,
                shared,
            })
            .collect()
    }

    /// Feeds events in order on the calling thread.
    pub fn run<I>(&mut self, events: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = Event>,
    {
        let threads = self.threads;
        let mut cores = self.cores();
        for event in events {
            let tid = event.thread();
            let core = cores
                .get_mut(tid)
                .ok_or(Error::ThreadOutOfRange { tid, threads })?;
            core.on_event(&event);
        }
        Ok(())
    }

    pub fn stats(&self) -> SimStats {
        let instructions = self.instructions();
        let pages = self.shared.pages.as_ref().map(|p| p.lock());
        SimStats {
            instructions,
            page_walks: self.shared.page_walks.load(Ordering::Relaxed),
            fences: FenceStats {
                elided: self.shared.elided_fences.load(Ordering::Relaxed),
                executed: self.shared.executed_fences.load(Ordering::Relaxed),
            },
            levels: self
                .levels
                .iter()
                .map(|c| LevelStats::new(c, instructions))
                .collect(),
            directory: self.shared.directory.as_ref().map(|d| d.summary()),
            regions: pages.as_ref().map(|p| p.regions()),
            average_region_kib: pages.as_ref().and_then(|p| p.average_region_kib()),
            hot_walks: pages
                .as_ref()
                .filter(|_| self.shared.track_walks)
                .map(|p| p.hot_walks(HOT_WALKS)),
        }
    }

    /// Zeroes every counter but keeps cache, TLB and directory contents.
    pub fn clear_stats(&mut self) {
        self.levels.iter_mut().for_each(Cache::clear_stats);
        let shared = &mut self.shared;
        for counter in [
            &shared.instructions,
            &shared.page_walks,
            &shared.elided_fences,
            &shared.executed_fences,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Some(pages) = &mut shared.pages {
            pages.get_mut().clear();
        }
    }
}

/// The hierarchy as seen by one simulated thread.
#[derive(Debug)]
pub struct Core<'a> {
    cpu: Cpu,
    levels: Vec<LevelView<'a>>,
    roles: &'a Roles,
    shared: &'a SharedState,
}

impl<'a> Core<'a> {
    pub fn tid(&self) -> ThreadId {
        self.cpu.tid
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn on_event(&mut self, event: &Event) {
        debug_assert_eq!(event.thread(), self.cpu.tid.index());
        match *event {
            Event::Fetch { ip, .. } => self.fetch(ip),
            Event::Data {
                ip, addr, size, ty, ..
            } => self.data(ip, addr, u64::from(size), ty),
        }
    }

    /// Instruction fetch at `addr`. Fetches never cross a line.
    pub fn fetch(&mut self, addr: u64) {
        self.shared.instructions.fetch_add(1, Ordering::Relaxed);
        self.cpu.ip = addr;
        self.cpu.instr_idx += 1;

        let ty = AccessType::Load;
        let l1_hit = match self.roles.get(Role::Il1) {
            Some(il1) => self.access_line(il1, addr, addr, 1, ty),
            None => false,
        };
        if !l1_hit {
            self.access_unified(addr, addr, 1, ty);
        }

        self.translate(addr, ty, [Role::Itlbm, Role::Itlb1]);
    }

    /// Data access of `size` bytes at `addr`, issued by the instruction at `iaddr`.
    pub fn data(&mut self, iaddr: u64, addr: u64, size: u64, ty: AccessType) {
        if let Some(pages) = &self.shared.pages {
            pages.lock().touch(addr);
        }

        let l1_hit = match self.roles.get(Role::Dl1) {
            Some(dl1) => self.access_line(dl1, iaddr, addr, size, ty),
            None => false,
        };
        let hit = l1_hit || self.access_unified(iaddr, addr, size, ty);

        self.translate(addr, ty, [Role::Dtlbm, Role::Dtlb1]);

        // ownership from this store's own translation is already in place
        if !hit && ty == AccessType::Store {
            if let Some(directory) = &self.shared.directory {
                let counter = if directory.single_owner(page_of(addr)) {
                    &self.shared.elided_fences
                } else {
                    &self.shared.executed_fences
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// `ul2` then `ul3`. Returns whether either hit.
    fn access_unified(&mut self, iaddr: u64, addr: u64, size: u64, ty: AccessType) -> bool {
        for role in [Role::Ul2, Role::Ul3] {
            if let Some(id) = self.roles.get(role) {
                if self.access_line(id, iaddr, addr, size, ty) {
                    return true;
                }
            }
        }
        false
    }

    fn translate(&mut self, addr: u64, ty: AccessType, first_levels: [Role; 2]) {
        for role in first_levels {
            if let Some(id) = self.roles.get(role) {
                if self.access_page(id, addr, ty) {
                    return;
                }
            }
        }
        let l2_hit = match self.roles.get(Role::Utlb2) {
            Some(utlb2) => self.access_page(utlb2, addr, ty),
            None => false,
        };
        if !l2_hit {
            self.page_walk(addr);
        }
    }

    fn page_walk(&mut self, addr: u64) {
        self.shared.page_walks.fetch_add(1, Ordering::Relaxed);
        if self.shared.track_walks {
            if let Some(pages) = &self.shared.pages {
                pages.lock().record_walk(addr);
            }
        }
    }

    fn access_line(&mut self, id: LevelId, iaddr: u64, addr: u64, size: u64, ty: AccessType) -> bool {
        let view = &mut self.levels[id.0];
        let outcome = if view.geometry().crosses_line(addr, size) {
            view.access(iaddr, addr, size, ty)
        } else {
            view.access_single_line(iaddr, addr, ty)
        };
        for &block in &outcome.evicted {
            self.evict_prev(id, block);
        }
        outcome.hit
    }

    fn access_page(&mut self, id: LevelId, addr: u64, ty: AccessType) -> bool {
        let outcome = self.levels[id.0].access_page(addr, ty);
        if outcome.allocated {
            // the level's lock, if any, is already released here
            if let Some(directory) = &self.shared.directory {
                directory.transfer(page_of(addr), evicted_page(&outcome), self.cpu.tid);
            }
        }
        for &block in &outcome.evicted {
            self.evict_prev(id, block);
        }
        outcome.hit
    }

    /// Drops `block` from every level registered as previous to `id`, and
    /// from their previous levels in turn.
    fn evict_prev(&mut self, id: LevelId, block: Block) {
        let prev = self.levels[id.0].prev();
        for &p in prev {
            let freed = self.levels[p.0].evict(block);
            if freed > 0 {
                log::trace!("{}: back-invalidated {:#x}", self.cpu.tid, block.addr);
            }
            self.evict_prev(p, block);
        }
    }
}
