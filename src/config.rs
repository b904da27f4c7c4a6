use serde::Deserialize;

use crate::{
    addr::PAGE_SIZE,
    cpu::MAX_THREADS,
    error::ConfigError,
    replace::ReplacementPolicy,
};

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Total size in bytes. For TLBs: entries x page size.
    pub size: u64,
    pub line_size: u64,
    pub associativity: u64,
    #[serde(default = "enabled_default")]
    pub store_allocates: bool,
}

impl CacheConfig {
    pub fn cache(size: u64, line_size: u64, associativity: u64) -> Self {
        CacheConfig {
            enabled: true,
            size,
            line_size,
            associativity,
            store_allocates: true,
        }
    }

    pub fn tlb(entries: u64, associativity: u64) -> Self {
        Self::cache(entries * PAGE_SIZE, PAGE_SIZE, associativity)
    }
}

/// Per-role level configuration. A missing or disabled entry removes the level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LevelConfigs {
    pub il1: Option<CacheConfig>,
    pub dl1: Option<CacheConfig>,
    pub ul2: Option<CacheConfig>,
    pub ul3: Option<CacheConfig>,
    pub itlbm: Option<CacheConfig>,
    pub dtlbm: Option<CacheConfig>,
    pub itlb1: Option<CacheConfig>,
    pub dtlb1: Option<CacheConfig>,
    pub utlb2: Option<CacheConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub threads: usize,
    pub replacement: ReplacementPolicy,
    pub seed: u64,
    /// Track page ownership in a coherence directory.
    pub coherence: bool,
    /// Record touched pages and report contiguous regions.
    pub track_pages: bool,
    /// Record pages that needed a page-table walk.
    pub track_page_walks: bool,
    pub levels: LevelConfigs,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            threads: 1,
            replacement: ReplacementPolicy::Lru,
            seed: 0,
            coherence: true,
            track_pages: false,
            track_page_walks: false,
            levels: LevelConfigs {
                il1: Some(CacheConfig::cache(32 * 1024, 64, 8)),
                dl1: Some(CacheConfig::cache(32 * 1024, 64, 8)),
                ul2: Some(CacheConfig::cache(256 * 1024, 64, 8)),
                ul3: Some(CacheConfig::cache(8 * 1024 * 1024, 64, 16)),
                itlbm: None,
                dtlbm: None,
                itlb1: Some(CacheConfig::tlb(64, 4)),
                dtlb1: Some(CacheConfig::tlb(64, 4)),
                utlb2: Some(CacheConfig::tlb(1024, 8)),
            },
        }
    }
}

impl SimConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 || self.threads > MAX_THREADS {
            return Err(ConfigError::Threads {
                threads: self.threads,
                max: MAX_THREADS,
            });
        }
        Ok(())
    }
}
