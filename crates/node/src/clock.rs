//! Relógio de tempo real do device.

use bug_core::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// RTC compartilhado: o supervisor acerta após o SNTP, o sampler lê.
pub trait Clock: Send + Sync + 'static {
    /// Segundos desde a época Unix.
    fn now(&self) -> Timestamp;

    fn set(&self, ts: Timestamp);
}

/// RTC baseado num relógio monotônico mais um offset ajustável.
#[derive(Debug)]
pub struct RtcClock {
    boot: Instant,
    offset: AtomicI64,
}

impl RtcClock {
    /// Relógio que começa em `start` segundos.
    pub fn new(start: Timestamp) -> Self {
        Self {
            boot: Instant::now(),
            offset: AtomicI64::new(i64::from(start)),
        }
    }

    /// Relógio que começa no horário do sistema.
    pub fn from_system() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::new(u32::try_from(now).unwrap_or(u32::MAX))
    }

    fn uptime_secs(&self) -> i64 {
        i64::try_from(self.boot.elapsed().as_secs()).unwrap_or(i64::MAX)
    }
}

impl Clock for RtcClock {
    fn now(&self) -> Timestamp {
        let secs = self.offset.load(Ordering::Acquire).saturating_add(self.uptime_secs());
        secs.clamp(0, i64::from(u32::MAX)) as Timestamp
    }

    fn set(&self, ts: Timestamp) {
        self.offset
            .store(i64::from(ts) - self.uptime_secs(), Ordering::Release);
    }
}
