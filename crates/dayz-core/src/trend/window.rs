//! Ring buffer of recent player counts for one server

use heapless::Deque;

use crate::config::TREND_CAPACITY;

/// `(timestamp, players)`
pub type TrendPoint = (u32, i16);

fn is_recent(point: &TrendPoint, now: u32, window_secs: u32) -> bool {
    now.saturating_sub(point.0) <= window_secs
}

#[derive(Default)]
pub struct TrendWindow {
    points: Deque<TrendPoint, TREND_CAPACITY>,
}

impl TrendWindow {
    pub const fn new() -> Self {
        Self {
            points: Deque::new(),
        }
    }

    /// Add a point, dropping the oldest when full
    ///
    /// Unknown (negative) counts are rejected.
    pub fn push(&mut self, timestamp: u32, players: i16) -> bool {
        if players < 0 {
            return false;
        }
        if self.points.is_full() {
            self.points.pop_front();
        }
        let _ = self.points.push_back((timestamp, players));
        true
    }

    pub fn qualifying(&self, now: u32, window_secs: u32) -> usize {
        self.points
            .iter()
            .filter(|point| is_recent(point, now, window_secs))
            .count()
    }

    /// Newest minus oldest count among the points inside the window
    ///
    /// Oldest is the first-inserted point with the smallest timestamp, newest
    /// the last-inserted point with the largest one.
    pub fn trend(&self, now: u32, window_secs: u32) -> i32 {
        let mut oldest: Option<TrendPoint> = None;
        let mut newest: Option<TrendPoint> = None;
        let mut qualifying = 0usize;

        let recent = self
            .points
            .iter()
            .filter(|point| is_recent(point, now, window_secs));
        for point in recent {
            qualifying += 1;
            if oldest.is_none_or(|(ts, _)| point.0 < ts) {
                oldest = Some(*point);
            }
            if newest.is_none_or(|(ts, _)| point.0 >= ts) {
                newest = Some(*point);
            }
        }

        match (oldest, newest) {
            (Some((_, first)), Some((_, last))) if qualifying >= 2 => {
                i32::from(last) - i32::from(first)
            }
            _ => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
