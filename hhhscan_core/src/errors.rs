//! Error type for hhhscan

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid prefix length bounds: first_len={first}, last_len={last} (need 1 <= first <= last <= 32)")]
    InvalidLengthBounds { first: u8, last: u8 },
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("threshold, speed and quotient are mutually exclusive")]
    ConflictingThresholds,
    #[error("quotient {0} must lie in (0, 1]")]
    InvalidQuotient(f64),
    #[error("quotient is only meaningful for the offline engine")]
    QuotientRequiresOffline,
    #[error("the hashed engine needs a memory budget")]
    MissingMemoryBudget,
    #[error("memory budget of {budget} slots cannot cover {layers} prefix layers")]
    MemoryBudgetTooSmall { budget: u64, layers: u64 },
    #[error("invalid bloom filter parameters: {0}")]
    InvalidBloom(String),
    #[error("invalid hashpipe geometry: {stages} stages over {slots} slots")]
    InvalidHashPipe { stages: usize, slots: usize },
    #[error("invalid injection sampling {num}/{den} (need 1 <= num <= den)")]
    InvalidSampling { num: u32, den: u32 },
    #[error("unknown engine `{0}`")]
    UnknownEngine(String),
    #[error("unknown count mode `{0}` (bytes, packets or flows)")]
    UnknownCountMode(String),
    #[error("unknown collision strategy `{0}`")]
    UnknownCollisionStrategy(String),
    #[error("invalid prefix `{0}`")]
    InvalidPrefix(String),
    #[error("malformed trace record #{index}: {reason}")]
    MalformedRecord { index: u64, reason: String },
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Configuration problems are fatal at startup and map to exit status 2;
    /// I/O failures to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Io(_) | Error::MalformedRecord { .. } => 1,
            _ => 2,
        }
    }
}
