//! Player-count alerts for the active server
//!
//! The banner shows while a condition holds; the buzzer should only sound
//! when an alert episode starts, which [`AlertState::update`] reports as
//! [`AlertTransition::Raised`].

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// Players reached the server's capacity
    ServerFull,
    /// Players reached the configured threshold
    Threshold(u16),
}

impl AlertKind {
    /// Assess the alert condition for a player count
    ///
    /// Server full takes precedence over the threshold.
    pub fn assess(players: i16, max_players: u16, threshold: u16) -> Option<Self> {
        let Ok(players) = u16::try_from(players) else {
            return None;
        };
        if max_players > 0 && players >= max_players {
            Some(Self::ServerFull)
        } else if threshold > 0 && players >= threshold {
            Some(Self::Threshold(threshold))
        } else {
            None
        }
    }

    /// Get the banner color (RGB888)
    pub const fn color_hex(self) -> u32 {
        match self {
            Self::ServerFull => 0xFF_4444,
            Self::Threshold(_) => 0xFF_8800,
        }
    }
}

impl core::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ServerFull => write!(f, "SERVER FULL!"),
            Self::Threshold(threshold) => write!(f, "ALERT: {}+ players!", threshold),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    /// An alert episode started: show the banner and beep
    Raised(AlertKind),
    /// Still alerting, possibly for a different reason: no beep
    Changed(AlertKind),
    Cleared,
    Unchanged,
}

/// Currently shown alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertState {
    active: Option<AlertKind>,
}

impl AlertState {
    pub fn active(&self) -> Option<AlertKind> {
        self.active
    }

    pub fn update(&mut self, assessed: Option<AlertKind>) -> AlertTransition {
        let previous = core::mem::replace(&mut self.active, assessed);
        match (previous, assessed) {
            (None, Some(kind)) => AlertTransition::Raised(kind),
            (Some(old), Some(new)) if old != new => AlertTransition::Changed(new),
            (Some(_), None) => AlertTransition::Cleared,
            _ => AlertTransition::Unchanged,
        }
    }
}
