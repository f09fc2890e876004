//! Server restart detection and countdown prediction
//!
//! A restart is inferred when a populated server suddenly reports zero
//! players. Each server keeps a short log of restart times; once two are
//! known the mean interval predicts the next one. A manually configured
//! schedule takes precedence over the learned prediction.

mod schedule;

pub use schedule::{RestartSchedule, ScheduleError, VALID_INTERVALS};

use core::fmt::Write as _;

use heapless::{String, Vec};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{
    MAX_RESTART_HISTORY, MIN_RESTART_INTERVAL_SECS, RESTART_DETECT_DROP_TO,
    RESTART_DETECT_MIN_PLAYERS,
};

/// Mean of the consecutive deltas of `times`
///
/// `None` with fewer than two restarts.
pub fn average_interval(times: &[u32]) -> Option<u32> {
    if times.len() < 2 {
        return None;
    }
    let total: u64 = times
        .windows(2)
        .map(|pair| u64::from(pair[1].saturating_sub(pair[0])))
        .sum();
    u32::try_from(total / (times.len() as u64 - 1)).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorState {
    /// Fewer than two restarts observed
    Learning,
    /// Average interval known
    Trained,
    /// Manual schedule configured
    ManualOverride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded {
        restart_count: usize,
        average_interval_secs: Option<u32>,
    },
    /// Too soon after the previous restart
    Debounced { since_last: u32 },
}

fn unknown_players() -> i16 {
    -1
}

/// Restart history of one server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RestartLog {
    times: Vec<u32, MAX_RESTART_HISTORY>,
    last_restart_time: u32,
    average_interval_secs: u32,
    /// Edge-detector state, not persisted
    #[serde(skip, default = "unknown_players")]
    last_known_players: i16,
}

impl Default for RestartLog {
    fn default() -> Self {
        Self {
            times: Vec::new(),
            last_restart_time: 0,
            average_interval_secs: 0,
            last_known_players: unknown_players(),
        }
    }
}

impl RestartLog {
    pub fn times(&self) -> &[u32] {
        &self.times
    }

    pub fn restart_count(&self) -> usize {
        self.times.len()
    }

    pub fn last_restart_time(&self) -> u32 {
        self.last_restart_time
    }

    /// Zero until two restarts are known
    pub fn average_interval_secs(&self) -> u32 {
        self.average_interval_secs
    }

    pub fn last_known_players(&self) -> i16 {
        self.last_known_players
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Record a restart at `timestamp`
    pub fn record(&mut self, timestamp: u32) -> RecordOutcome {
        if self.last_restart_time > 0 {
            let since_last = timestamp.saturating_sub(self.last_restart_time);
            if since_last < MIN_RESTART_INTERVAL_SECS {
                warn!("Ignoring restart - {}s after the last one", since_last);
                return RecordOutcome::Debounced { since_last };
            }
        }

        if self.times.is_full() {
            self.times.remove(0);
        }
        // Cannot fail: a slot was freed above
        let _ = self.times.push(timestamp);
        self.last_restart_time = timestamp;

        let average = average_interval(&self.times);
        if let Some(avg) = average {
            self.average_interval_secs = avg;
            info!(
                "Server restart detected! Avg interval: {}h {}m",
                avg / 3600,
                (avg % 3600) / 60
            );
        } else {
            info!("Server restart detected (first one, still learning)");
        }

        RecordOutcome::Recorded {
            restart_count: self.times.len(),
            average_interval_secs: average,
        }
    }

    /// Feed the latest player count; records a restart on a drop to zero
    /// from a populated server
    pub fn detect(&mut self, current_count: i16, now: u32) -> Option<RecordOutcome> {
        let dropped = self.last_known_players >= RESTART_DETECT_MIN_PLAYERS
            && current_count == RESTART_DETECT_DROP_TO;
        self.last_known_players = current_count;
        dropped.then(|| self.record(now))
    }

    pub fn state(&self, schedule: &RestartSchedule) -> PredictorState {
        if schedule.is_active() {
            PredictorState::ManualOverride
        } else if self.times.len() >= 2 && self.average_interval_secs > 0 {
            PredictorState::Trained
        } else {
            PredictorState::Learning
        }
    }

    /// Seconds until the next expected restart, 0 when overdue, -1 when
    /// unknown
    pub fn predict_countdown(&self, schedule: &RestartSchedule, now: u32, utc_offset_secs: i32) -> i32 {
        match self.state(schedule) {
            PredictorState::ManualOverride => schedule
                .seconds_until_next(now, utc_offset_secs)
                .map_or(-1, |secs| secs.min(i32::MAX as u32) as i32),
            PredictorState::Trained => {
                let next = u64::from(self.last_restart_time) + u64::from(self.average_interval_secs);
                let now = u64::from(now);
                if now >= next {
                    0
                } else {
                    (next - now).min(i32::MAX as u64) as i32
                }
            }
            PredictorState::Learning => -1,
        }
    }
}

/// Display text for a countdown from [`RestartLog::predict_countdown`]
pub fn format_countdown(seconds: i32) -> String<16> {
    let mut text = String::new();
    let _ = match seconds {
        s if s < 0 => write!(text, "Unknown"),
        0 => write!(text, "Imminent!"),
        s if s >= 3600 => write!(text, "~{}h {}m", s / 3600, (s % 3600) / 60),
        s => write!(text, "~{}m", s / 60),
    };
    text
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartUrgency {
    Unknown,
    Imminent,
    /// Under 30 minutes away
    Soon,
    Later,
}

impl RestartUrgency {
    pub const fn assess(countdown_secs: i32) -> Self {
        if countdown_secs < 0 {
            Self::Unknown
        } else if countdown_secs == 0 {
            Self::Imminent
        } else if countdown_secs < 1800 {
            Self::Soon
        } else {
            Self::Later
        }
    }

    /// Get the display color (RGB888) for this urgency
    pub const fn color_hex(self) -> u32 {
        match self {
            Self::Unknown => 0x8B_8B8B,
            Self::Imminent => 0xFF_3B30,
            Self::Soon => 0xFF_9500,
            Self::Later => 0x34_C759,
        }
    }
}
