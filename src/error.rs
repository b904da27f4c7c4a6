use std::io;

/// Invalid model description. Detected while building caches, never at access time.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{name}: line size {line_size} is not a power of two")]
    LineSize { name: String, line_size: u64 },

    #[error("{name}: associativity must be a non-zero power of two, got {associativity}")]
    Associativity { name: String, associativity: u64 },

    #[error("{name}: size {size} is not a multiple of line size x associativity ({line_size} x {associativity})")]
    Geometry {
        name: String,
        size: u64,
        line_size: u64,
        associativity: u64,
    },

    #[error("{name}: set count {sets} is not a non-zero power of two")]
    SetCount { name: String, sets: u64 },

    #[error("thread count must be between 1 and {max}, got {threads}")]
    Threads { threads: usize, max: usize },

    #[error("unknown replacement policy {0:?}")]
    Policy(String),

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum TraceError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("record {index}: unknown access kind {kind}")]
    BadRecord { index: u64, kind: u8 },

    #[error("trace ends with a partial record of {0} bytes")]
    Truncated(usize),

    #[error("thread id {0} does not fit a trace record")]
    Thread(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("thread id {tid} out of range, hierarchy was built for {threads} threads")]
    ThreadOutOfRange { tid: usize, threads: usize },
}
