use std::fmt;

use serde::Serialize;

/// Upper bound on simulated threads: one bit per thread in the coherence
/// directory's owner mask.
pub const MAX_THREADS: usize = u64::BITS as usize;

/// Index of a simulated thread, checked against the hierarchy's thread count
/// when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ThreadId(usize);

impl ThreadId {
    pub(crate) const fn new_unchecked(tid: usize) -> Self {
        debug_assert!(tid < MAX_THREADS);
        ThreadId(tid)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0
    }

    #[inline]
    pub fn mask(self) -> u64 {
        1 << self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Per simulated thread front-end state.
#[derive(Debug)]
pub struct Cpu {
    pub tid: ThreadId,
    pub ip: u64,
    pub instr_idx: u64,
}

impl Cpu {
    pub fn new(tid: ThreadId) -> Self {
        Cpu {
            tid,
            ip: 0,
            instr_idx: 0,
        }
    }
}
