//! Wall-clock source
//!
//! The firmware implements [`Clock`] on top of SNTP-synced system time; the
//! simulator and tests drive a [`ManualClock`].

use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::TIMESTAMP_MIN_VALID;

/// Source of unix timestamps (seconds)
pub trait Clock {
    fn now_unix(&self) -> u32;

    /// Whether the clock has been synced to real time
    fn is_synced(&self) -> bool {
        self.now_unix() >= TIMESTAMP_MIN_VALID
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    pub const fn new(start: u32) -> Self {
        Self {
            now: AtomicU32::new(start),
        }
    }

    pub fn set(&self, timestamp: u32) {
        self.now.store(timestamp, Ordering::Relaxed);
    }

    pub fn advance(&self, secs: u32) {
        self.now.fetch_add(secs, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }
}
