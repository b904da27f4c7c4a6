#![allow(dead_code)]

use hiersim::{config::LevelConfigs, AccessType, CacheConfig, Event, SimConfig};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A hierarchy made of a single private data cache.
pub fn dl1_only(dl1: CacheConfig) -> SimConfig {
    SimConfig {
        coherence: false,
        levels: LevelConfigs {
            dl1: Some(dl1),
            ..LevelConfigs::default()
        },
        ..SimConfig::default()
    }
}

/// Small caches so that a few thousand events cause evictions everywhere.
pub fn small_hierarchy(threads: usize) -> SimConfig {
    SimConfig {
        threads,
        levels: LevelConfigs {
            il1: Some(CacheConfig::cache(2 * 1024, 64, 2)),
            dl1: Some(CacheConfig::cache(4 * 1024, 64, 4)),
            ul2: Some(CacheConfig::cache(16 * 1024, 64, 4)),
            ul3: Some(CacheConfig::cache(64 * 1024, 64, 8)),
            itlbm: None,
            dtlbm: None,
            itlb1: Some(CacheConfig::tlb(4, 2)),
            dtlb1: Some(CacheConfig::tlb(8, 2)),
            utlb2: Some(CacheConfig::tlb(32, 4)),
        },
        ..SimConfig::default()
    }
}

pub const SHARED_BASE: u64 = 0x8000_0000;
pub const REGION: u64 = 256 * 1024;

pub fn private_base(tid: usize) -> u64 {
    0x1000_0000 * (tid as u64 + 1)
}

/// Fetches with an occasional load or store, over a code region, a private
/// region per thread and one region shared by all threads.
pub fn workload(tid: usize, len: usize, seed: u64) -> Vec<Event> {
    let mut rng = fastrand::Rng::with_seed(seed ^ (tid as u64) << 8);
    let mut ip = 0x40_0000;
    let mut events = Vec::with_capacity(len);
    while events.len() < len {
        ip = if rng.u8(..8) == 0 {
            (0x40_0000 + rng.u64(..0x4000)) & !3
        } else {
            ip + 4
        };
        events.push(Event::Fetch { ip, tid });
        if rng.bool() {
            let base = if rng.u8(..4) == 0 {
                SHARED_BASE
            } else {
                private_base(tid)
            };
            let ty = if rng.u8(..3) == 0 {
                AccessType::Store
            } else {
                AccessType::Load
            };
            events.push(Event::Data {
                ip,
                addr: base + rng.u64(..REGION),
                size: [1u16, 2, 4, 8, 16, 32][rng.usize(..6)],
                ty,
                tid,
            });
        }
    }
    events.truncate(len);
    events
}

/// Every line address an event touches, with 64-byte lines.
pub fn touched_lines(events: &[Event]) -> Vec<u64> {
    let mut lines: Vec<u64> = events
        .iter()
        .flat_map(|event| {
            let (addr, size) = match *event {
                Event::Fetch { ip, .. } => (ip, 1),
                Event::Data { addr, size, .. } => (addr, u64::from(size)),
            };
            let first = addr & !63;
            let last = (addr + size - 1) & !63;
            (first..=last).step_by(64)
        })
        .collect();
    lines.sort_unstable();
    lines.dedup();
    lines
}

pub fn count_fetches(events: &[Event]) -> u64 {
    events
        .iter()
        .filter(|e| matches!(e, Event::Fetch { .. }))
        .count() as u64
}
