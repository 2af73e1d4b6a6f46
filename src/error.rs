use thiserror::Error;

/// Construction-time validation failures. Once a component is built there are
/// no recoverable runtime errors; refused operations simply return `false`.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("row width must be a nonzero power of two, got {0}")]
    BadWidth(usize),

    #[error("sketch depth must be at least 1")]
    ZeroDepth,

    #[error("unsupported counter width {0} (expected 8, 16 or 32 bits)")]
    BadCounterWidth(u8),

    #[error("unsupported key width {0} (expected 32, 48 or 64 bits)")]
    BadKeyWidth(u8),

    #[error("expected {expected} hash coefficient pairs, got {got}")]
    HashParamCount { expected: usize, got: usize },

    #[error("window must be at least 1 sample")]
    ZeroWindow,

    #[error("rolling ring holds 2 or 3 sketches, got {0}")]
    BadRingSize(usize),

    #[error("queue depth must be at least 1")]
    ZeroFifoDepth,
}

/// Failures while loading the JSON configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Build(#[from] BuildError),
}
