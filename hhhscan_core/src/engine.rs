//! Common interface of the three HHH engines.

use crate::config::{Config, EngineKind};
use crate::errors::Result;
use crate::hashed::HashedEngine;
use crate::offline::OfflineEngine;
use crate::online::OnlineEngine;
use crate::report::ReportSink;
use crate::types::Packet;
use log::info;

/// A streaming HHH detector. Packets must arrive in non-decreasing
/// timestamp order.
pub trait HhhModel {
    /// Feed one packet. Returns `false` once the engine refuses further
    /// input (offline first-shot mode); the driver then stops reading.
    fn process_packet(&mut self, pkt: &Packet, sink: &mut dyn ReportSink) -> bool;

    /// End of stream or window: emit whatever the engine still holds.
    fn flush(&mut self, sink: &mut dyn ReportSink);

    /// Drop all state.
    fn clear(&mut self);
}

/// Outcome of one pass of the per-packet state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Done,
    /// The located node was invalidated; look up again for the same packet.
    Retry,
}

pub enum Engine {
    Online(OnlineEngine),
    Hashed(HashedEngine),
    Offline(OfflineEngine),
}

impl Engine {
    /// Validate `cfg` and build the engine it selects.
    pub fn from_config(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        info!(
            "engine {:?}: lengths {}..={}, threshold {}, mode {:?}",
            cfg.engine,
            cfg.first_len,
            cfg.last_len,
            cfg.base_threshold(),
            cfg.mode
        );
        Ok(match cfg.engine {
            EngineKind::Online => Engine::Online(OnlineEngine::new(cfg)?),
            EngineKind::Hashed => Engine::Hashed(HashedEngine::new(cfg)?),
            EngineKind::Offline => Engine::Offline(OfflineEngine::new(cfg)?),
        })
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Online(_) => EngineKind::Online,
            Engine::Hashed(_) => EngineKind::Hashed,
            Engine::Offline(_) => EngineKind::Offline,
        }
    }

    fn model(&mut self) -> &mut dyn HhhModel {
        match self {
            Engine::Online(e) => e,
            Engine::Hashed(e) => e,
            Engine::Offline(e) => e,
        }
    }
}

impl HhhModel for Engine {
    fn process_packet(&mut self, pkt: &Packet, sink: &mut dyn ReportSink) -> bool {
        self.model().process_packet(pkt, sink)
    }

    fn flush(&mut self, sink: &mut dyn ReportSink) {
        self.model().flush(sink)
    }

    fn clear(&mut self) {
        self.model().clear()
    }
}
