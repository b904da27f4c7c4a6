pub mod addr;
pub mod cache;
pub mod coherence;
pub mod config;
pub mod cpu;
pub mod error;
pub mod hierarchy;
pub mod pages;
pub mod replace;
pub mod stats;
pub mod trace;

pub use cache::{AccessType, Cache, CacheGeometry, CacheKind};
pub use config::{CacheConfig, SimConfig};
pub use cpu::ThreadId;
pub use error::{ConfigError, Error, TraceError};
pub use hierarchy::{Core, Hierarchy, Role};
pub use replace::ReplacementPolicy;
pub use stats::SimStats;
pub use trace::{Event, Trace};
