//! Short-term player-count trends
//!
//! Slot 0 tracks the active server, slots 1..=3 the secondary servers shown
//! next to it. Each slot keeps a small ring of `(timestamp, players)` points
//! fed by the pollers.

mod window;

pub use window::{TrendPoint, TrendWindow};

use crate::config::{MAX_SECONDARY_SLOTS, TREND_WINDOW_SECS};
use crate::storage::HistoryError;

pub const MAIN_SLOT: usize = 0;
pub const TREND_SLOTS: usize = 1 + MAX_SECONDARY_SLOTS;

/// Trend windows for the main server and its secondaries
pub struct TrendTracker {
    windows: [TrendWindow; TREND_SLOTS],
    window_secs: u32,
}

impl Default for TrendTracker {
    fn default() -> Self {
        Self::new(TREND_WINDOW_SECS)
    }
}

impl TrendTracker {
    pub fn new(window_secs: u32) -> Self {
        Self {
            windows: core::array::from_fn(|_| TrendWindow::new()),
            window_secs,
        }
    }

    pub fn window_secs(&self) -> u32 {
        self.window_secs
    }

    fn slot(&self, slot: usize) -> Result<&TrendWindow, HistoryError> {
        self.windows.get(slot).ok_or(HistoryError::InvalidSlot(slot))
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut TrendWindow, HistoryError> {
        self.windows
            .get_mut(slot)
            .ok_or(HistoryError::InvalidSlot(slot))
    }

    /// Record a player count; negative (unknown) counts are ignored
    ///
    /// Returns whether the point was stored.
    pub fn add_point(&mut self, slot: usize, timestamp: u32, players: i16) -> Result<bool, HistoryError> {
        Ok(self.slot_mut(slot)?.push(timestamp, players))
    }

    /// Player delta across the trend window, 0 with fewer than two points
    pub fn trend(&self, slot: usize, now: u32) -> Result<i32, HistoryError> {
        Ok(self.slot(slot)?.trend(now, self.window_secs))
    }

    /// Points inside the trend window
    pub fn qualifying(&self, slot: usize, now: u32) -> Result<usize, HistoryError> {
        Ok(self.slot(slot)?.qualifying(now, self.window_secs))
    }

    pub fn clear(&mut self, slot: usize) -> Result<(), HistoryError> {
        self.slot_mut(slot)?.clear();
        Ok(())
    }

    pub fn clear_secondary(&mut self) {
        for window in &mut self.windows[1..] {
            window.clear();
        }
    }

    pub fn clear_all(&mut self) {
        for window in &mut self.windows {
            window.clear();
        }
    }

    pub fn swap(&mut self, a: usize, b: usize) -> Result<(), HistoryError> {
        self.slot(a)?;
        self.slot(b)?;
        self.windows.swap(a, b);
        Ok(())
    }
}
