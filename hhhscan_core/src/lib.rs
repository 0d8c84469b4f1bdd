//! Windowed hierarchical heavy-hitter detection over IPv4 source prefixes.
//!
//! Three interchangeable engines implement [`engine::HhhModel`]:
//! [`online::OnlineEngine`] (exact ordered map), [`hashed::HashedEngine`]
//! (fixed per-depth tables under a slot budget) and
//! [`offline::OfflineEngine`] (batch aggregation per window). The
//! [`hashpipe::HashPipe`] top-K sketch is independent of them.

pub mod bloom;
pub mod config;
pub mod constants;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod hashed;
pub mod hashpipe;
pub mod helpers;
pub mod offline;
pub mod online;
pub mod report;
pub mod schedule;
pub mod telemetry;
pub mod trace;
pub mod types;

pub use config::{CollisionStrategy, Config, EngineKind};
pub use engine::{Engine, HhhModel};
pub use errors::{Error, Result};
pub use report::{LineSink, Report, ReportSink};
pub use types::{CountMode, Packet, Prefix};

use once_cell::sync::OnceCell;

/// Install the metrics recorder and a fallback logger once per process.
pub fn init() {
    telemetry::init();
    ensure_logging();
}

// ---- logging bootstrapper -----------------------------------------------
fn ensure_logging() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        // Fallback: simple env_logger with RFC-3339 ts off.
        let _ = env_logger::builder()
            .format_timestamp(None)
            .is_test(std::env::var("RUST_TEST_THREADS").is_ok())
            .try_init();
    });
}
