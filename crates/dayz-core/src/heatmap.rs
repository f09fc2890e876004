//! Weekly activity heatmap
//!
//! Averages the journaled player counts of the last four weeks per weekday
//! and four-hour period of the local day. The grid has Monday in row 0 and
//! the period starting at midnight in column 0.

use chrono::{DateTime, Datelike, Timelike};

use crate::storage::Sample;

pub const WEEKDAYS: usize = 7;

/// Four-hour periods per day
pub const PERIODS: usize = 6;

const HOURS_PER_PERIOD: u32 = 24 / PERIODS as u32;

pub const WEEKDAY_LABELS: [&str; WEEKDAYS] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

pub const PERIOD_LABELS: [&str; PERIODS] = ["00-04", "04-08", "08-12", "12-16", "16-20", "20-24"];

/// Normalization range used when no cell has data
const EMPTY_RANGE: (i16, i16) = (0, 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeatmapCell {
    pub sum: u32,
    /// Stops counting at 255; later samples of the cell are ignored
    pub count: u8,
}

impl HeatmapCell {
    fn add(&mut self, players: i16) {
        if self.count == u8::MAX {
            return;
        }
        self.sum += u32::from(players.unsigned_abs());
        self.count += 1;
    }

    /// Average player count, `None` without samples
    pub fn average(&self) -> Option<i16> {
        (self.count > 0).then(|| (self.sum / u32::from(self.count)) as i16)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heatmap {
    pub cells: [[HeatmapCell; PERIODS]; WEEKDAYS],
    pub min_avg: i16,
    pub max_avg: i16,
    /// Samples that went into the grid
    pub samples: usize,
}

impl Default for Heatmap {
    fn default() -> Self {
        Self {
            cells: [[HeatmapCell::default(); PERIODS]; WEEKDAYS],
            min_avg: EMPTY_RANGE.0,
            max_avg: EMPTY_RANGE.1,
            samples: 0,
        }
    }
}

/// Local weekday (Monday = 0) and period of a timestamp
pub fn bucket(timestamp: u32, utc_offset_secs: i32) -> Option<(usize, usize)> {
    let local = i64::from(timestamp) + i64::from(utc_offset_secs);
    let time = DateTime::from_timestamp(local, 0)?;
    let day = time.weekday().num_days_from_monday() as usize;
    let period = (time.hour() / HOURS_PER_PERIOD) as usize;
    Some((day, period.min(PERIODS - 1)))
}

impl Heatmap {
    pub fn from_samples(samples: &[Sample], utc_offset_secs: i32) -> Self {
        let mut heatmap = Self::default();
        for sample in samples.iter().filter(|s| s.player_count() >= 0) {
            let Some((day, period)) = bucket(sample.timestamp(), utc_offset_secs) else {
                continue;
            };
            heatmap.cells[day][period].add(sample.player_count());
            heatmap.samples += 1;
        }

        let averages = heatmap.cells.iter().flatten().filter_map(HeatmapCell::average);
        let range = averages.fold(None, |range: Option<(i16, i16)>, avg| {
            Some(range.map_or((avg, avg), |(min, max)| (min.min(avg), max.max(avg))))
        });
        (heatmap.min_avg, heatmap.max_avg) = range.unwrap_or(EMPTY_RANGE);
        heatmap
    }

    pub fn cell(&self, day: usize, period: usize) -> Option<&HeatmapCell> {
        self.cells.get(day)?.get(period)
    }

    pub fn level(&self, day: usize, period: usize) -> HeatLevel {
        let average = self.cell(day, period).and_then(HeatmapCell::average);
        HeatLevel::assess(average, self.min_avg, self.max_avg)
    }

    /// Cell with the highest average, earliest in the week on ties
    pub fn busiest(&self) -> Option<(usize, usize, i16)> {
        let mut best: Option<(usize, usize, i16)> = None;
        for (day, row) in self.cells.iter().enumerate() {
            for (period, cell) in row.iter().enumerate() {
                if let Some(avg) = cell.average()
                    && best.is_none_or(|(_, _, top)| avg > top)
                {
                    best = Some((day, period, avg));
                }
            }
        }
        best
    }
}

/// Intensity of a heatmap cell relative to the busiest and quietest cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatLevel {
    Empty,
    Low,
    MediumLow,
    Medium,
    MediumHigh,
    High,
}

impl HeatLevel {
    pub fn assess(average: Option<i16>, min_avg: i16, max_avg: i16) -> Self {
        let Some(value) = average.filter(|v| *v >= 0) else {
            return Self::Empty;
        };
        let range = (i32::from(max_avg) - i32::from(min_avg)).max(1);
        let percent = ((i32::from(value) - i32::from(min_avg)) * 100 / range).clamp(0, 100);
        match percent {
            0..25 => Self::Low,
            25..50 => Self::MediumLow,
            50..70 => Self::Medium,
            70..85 => Self::MediumHigh,
            _ => Self::High,
        }
    }

    /// Get the display color (RGB888) for this level
    pub const fn color_hex(self) -> u32 {
        match self {
            Self::Empty => 0x33_3333,
            Self::Low => 0x4C_AF50,
            Self::MediumLow => 0x8B_C34A,
            Self::Medium => 0xFF_EB3B,
            Self::MediumHigh => 0xFF_9800,
            Self::High => 0xF4_4336,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    // Monday 2024-11-04 00:00:00 UTC
    const MONDAY: u32 = 1_730_678_400;
    const HOUR: u32 = 3600;
    const DAY: u32 = 86_400;

    #[test]
    fn test_bucket_weekday_and_period() {
        assert_eq!(bucket(MONDAY, 0), Some((0, 0)));
        assert_eq!(bucket(MONDAY + 4 * HOUR, 0), Some((0, 1)));
        assert_eq!(bucket(MONDAY + 6 * DAY + 23 * HOUR, 0), Some((6, 5)));
        // 23:30 UTC Sunday is 00:30 Monday at UTC+1
        assert_eq!(bucket(MONDAY - 1800, 3600), Some((0, 0)));
        assert_eq!(bucket(MONDAY - 1800, 0), Some((6, 5)));
    }

    #[test]
    fn test_cells_average_across_weeks() {
        let samples = [
            Sample::new(MONDAY + 13 * HOUR, 20),
            Sample::new(MONDAY + 7 * DAY + 14 * HOUR, 40),
            Sample::new(MONDAY + 2 * DAY + HOUR, 5),
        ];
        let heatmap = Heatmap::from_samples(&samples, 0);

        assert_eq!(heatmap.samples, 3);
        assert_eq!(heatmap.cell(0, 3).and_then(HeatmapCell::average), Some(30));
        assert_eq!(heatmap.cell(2, 0).and_then(HeatmapCell::average), Some(5));
        assert_eq!(heatmap.cell(1, 0).and_then(HeatmapCell::average), None);
        assert_eq!((heatmap.min_avg, heatmap.max_avg), (5, 30));
        assert_eq!(heatmap.busiest(), Some((0, 3, 30)));
    }

    #[test]
    fn test_empty_uses_default_range() {
        let heatmap = Heatmap::from_samples(&[], 0);
        assert_eq!((heatmap.min_avg, heatmap.max_avg), (0, 60));
        assert_eq!(heatmap.busiest(), None);
        assert_eq!(heatmap.level(0, 0), HeatLevel::Empty);
    }

    #[test]
    fn test_cell_count_saturates() {
        let samples: Vec<Sample> = (0..300).map(|i| Sample::new(MONDAY + i, 10)).collect();
        let heatmap = Heatmap::from_samples(&samples, 0);
        let cell = heatmap.cell(0, 0).copied().unwrap_or_default();
        assert_eq!(cell.count, 255);
        assert_eq!(cell.sum, 2550);
        assert_eq!(cell.average(), Some(10));
    }

    #[test]
    fn test_levels() {
        assert_eq!(HeatLevel::assess(None, 0, 60), HeatLevel::Empty);
        assert_eq!(HeatLevel::assess(Some(0), 0, 60), HeatLevel::Low);
        assert_eq!(HeatLevel::assess(Some(15), 0, 60), HeatLevel::MediumLow);
        assert_eq!(HeatLevel::assess(Some(30), 0, 60), HeatLevel::Medium);
        assert_eq!(HeatLevel::assess(Some(45), 0, 60), HeatLevel::MediumHigh);
        assert_eq!(HeatLevel::assess(Some(60), 0, 60), HeatLevel::High);
        // A single populated cell is its own minimum
        assert_eq!(HeatLevel::assess(Some(12), 12, 12), HeatLevel::Low);
    }
}
