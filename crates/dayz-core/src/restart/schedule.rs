//! Manually configured restart schedule

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Restart intervals offered by the settings screen, in hours
pub const VALID_INTERVALS: [u8; 4] = [4, 6, 8, 12];

const SECS_PER_DAY: i64 = 86_400;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid time {0:02}:{1:02}")]
    InvalidTime(u8, u8),
    #[error("Unsupported interval {0}h")]
    InvalidInterval(u8),
}

/// "Restarts every `interval_hours`, one of them at `hour:minute` local time"
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartSchedule {
    pub hour: u8,
    pub minute: u8,
    pub interval_hours: u8,
    /// Whether the schedule overrides learned predictions
    pub manual: bool,
}

impl Default for RestartSchedule {
    fn default() -> Self {
        Self {
            hour: 0,
            minute: 0,
            interval_hours: 4,
            manual: false,
        }
    }
}

impl RestartSchedule {
    pub fn manual(hour: u8, minute: u8, interval_hours: u8) -> Result<Self, ScheduleError> {
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::InvalidTime(hour, minute));
        }
        if !VALID_INTERVALS.contains(&interval_hours) {
            return Err(ScheduleError::InvalidInterval(interval_hours));
        }
        Ok(Self {
            hour,
            minute,
            interval_hours,
            manual: true,
        })
    }

    pub fn is_active(&self) -> bool {
        self.manual && self.interval_hours > 0
    }

    /// Seconds from `now` until the next scheduled restart, strictly after
    /// `now` and at most one interval away
    ///
    /// Returns `None` when no manual schedule is active.
    pub fn seconds_until_next(&self, now: u32, utc_offset_secs: i32) -> Option<u32> {
        if !self.is_active() {
            return None;
        }
        let interval = i64::from(self.interval_hours) * 3600;
        let local_now = i64::from(now) + i64::from(utc_offset_secs);
        let midnight = local_now - local_now.rem_euclid(SECS_PER_DAY);
        let anchor = midnight + i64::from(self.hour) * 3600 + i64::from(self.minute) * 60;

        // Smallest anchor + k * interval that is > local_now
        let steps = (local_now - anchor).div_euclid(interval) + 1;
        let next = anchor + steps * interval;
        u32::try_from(next - local_now).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-11-05 00:00:00 UTC
    const MIDNIGHT: u32 = 1_730_764_800;

    #[test]
    fn test_next_slot_later_today() {
        let schedule = RestartSchedule::manual(6, 0, 4).unwrap();
        // 05:00 UTC, restarts at 02:00, 06:00, 10:00 ...
        assert_eq!(schedule.seconds_until_next(MIDNIGHT + 5 * 3600, 0), Some(3600));
    }

    #[test]
    fn test_exact_restart_time_rolls_to_next() {
        let schedule = RestartSchedule::manual(6, 0, 4).unwrap();
        assert_eq!(
            schedule.seconds_until_next(MIDNIGHT + 6 * 3600, 0),
            Some(4 * 3600),
            "A restart exactly now is already past"
        );
    }

    #[test]
    fn test_anchor_steps_backwards_across_midnight() {
        let schedule = RestartSchedule::manual(22, 30, 6).unwrap();
        // 00:10 local: previous restarts 22:30, next at 04:30
        let now = MIDNIGHT + 600;
        assert_eq!(schedule.seconds_until_next(now, 0), Some(4 * 3600 + 20 * 60));
    }

    #[test]
    fn test_uses_local_offset() {
        let schedule = RestartSchedule::manual(12, 0, 12).unwrap();
        // 10:00 UTC is 11:00 CET: one hour to the 12:00 CET restart
        assert_eq!(schedule.seconds_until_next(MIDNIGHT + 10 * 3600, 3600), Some(3600));
    }

    #[test]
    fn test_inactive_schedule() {
        assert_eq!(RestartSchedule::default().seconds_until_next(MIDNIGHT, 0), None);
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            RestartSchedule::manual(24, 0, 4),
            Err(ScheduleError::InvalidTime(24, 0))
        );
        assert_eq!(
            RestartSchedule::manual(1, 0, 5),
            Err(ScheduleError::InvalidInterval(5))
        );
    }
}
