//! Ledger de eventos recebidos: contagem por tipo e último evento.

use crate::net_thread::NetMessage;
use bug_core::types::{BugEvent, BugEventKind};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Default)]
pub struct Ledger {
    by_kind: HashMap<&'static str, u64>,
    bytes: u64,
    last: Option<(String, BugEvent)>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra um evento aceito e loga o resumo.
    pub fn record(&mut self, msg: NetMessage) {
        let event = msg.event;
        *self.by_kind.entry(event.kind.name()).or_default() += 1;
        self.bytes += msg.raw_size as u64;

        match &event.kind {
            BugEventKind::Position(p) => info!(
                "← {} | Position {:?} → {:?} | {}..{} ({}s)",
                msg.source_addr,
                p.from.signed(),
                p.to.signed(),
                event.time_range.started_at,
                event.time_range.ended_at,
                event.time_range.duration_secs()
            ),
            BugEventKind::Luminosity(l) => info!(
                "← {} | Luminosity {} → {} | {}..{}",
                msg.source_addr,
                l.from,
                l.to,
                event.time_range.started_at,
                event.time_range.ended_at
            ),
        }

        self.last = Some((msg.source_addr, event));
    }

    pub fn count(&self, kind: &str) -> u64 {
        self.by_kind.get(kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.by_kind.values().sum()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn last(&self) -> Option<&(String, BugEvent)> {
        self.last.as_ref()
    }
}
