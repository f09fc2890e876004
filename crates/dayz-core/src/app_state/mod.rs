//! Application-wide state and error types for the tracker
//!
//! Everything the workers share lives in one [`AppState`] behind a single
//! lock. Access goes through [`SharedState`], which only ever waits a bounded
//! time and reports a skipped update instead of blocking.

mod lock;
pub mod settings;

pub use lock::{BoundedLock, FaultInjectingLock, LockFailure, LockOutcome, TimedMutex};
pub use settings::{ServerId, ServerSlot, Settings, SettingsError, load_settings, save_settings};

use embassy_time::Duration;
use heapless::String;
use log::debug;
use thiserror_no_std::Error;

use crate::alerts::AlertState;
use crate::config::{MAX_SECONDARY_SLOTS, TrackerConfig};
use crate::storage::{HistoryError, HistoryRange, RingStore, Sample, StorageError};
use crate::tasks::api::{QueryError, ServerStatus};
use crate::trend::TrendTracker;

/// How far the tracker got in bringing up its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRunState {
    /// Before the first worker tick
    Booting,
    /// WiFi down, polls are skipped
    Offline,
    /// Polling, but nothing is journaled until SNTP has synced
    WaitingForTime,
    Tracking,
}

impl AppRunState {
    pub const fn from_inputs(wifi_connected: bool, clock_synced: bool) -> Self {
        match (wifi_connected, clock_synced) {
            (false, _) => Self::Offline,
            (true, false) => Self::WaitingForTime,
            (true, true) => Self::Tracking,
        }
    }
}

/// Poll health of the active server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionHealth {
    pub consecutive_failures: u32,
    pub last_error: Option<QueryError>,
    pub last_success: u32,
}

impl ConnectionHealth {
    pub fn record_success(&mut self, now: u32) {
        self.consecutive_failures = 0;
        self.last_error = None;
        self.last_success = now;
    }

    pub fn record_failure(&mut self, error: QueryError) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
    }
}

/// Latest poll result for one secondary server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondaryStatus {
    pub server_index: usize,
    pub players: i16,
    pub max_players: u16,
    pub valid: bool,
    pub last_update: u32,
}

/// Live data of the active server
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuntimeState {
    pub status: Option<ServerStatus>,
    pub last_update: u32,
    pub wifi_connected: bool,
    /// Set by the UI, consumed by the active poller
    pub refresh_requested: bool,
    pub health: ConnectionHealth,
    pub secondary: heapless::Vec<SecondaryStatus, MAX_SECONDARY_SLOTS>,
}

impl RuntimeState {
    pub fn current_players(&self) -> i16 {
        self.status
            .as_ref()
            .map_or(Sample::UNKNOWN_PLAYERS, |status| status.player_count)
    }

    /// Forget everything about the previous active server
    pub fn reset_active(&mut self) {
        self.status = None;
        self.last_update = 0;
        self.health = ConnectionHealth::default();
    }

    pub fn secondary_for(&self, server_index: usize) -> Option<&SecondaryStatus> {
        self.secondary.iter().find(|s| s.server_index == server_index)
    }

    pub fn set_secondary(&mut self, status: SecondaryStatus) {
        if let Some(existing) = self
            .secondary
            .iter_mut()
            .find(|s| s.server_index == status.server_index)
        {
            *existing = status;
        } else if self.secondary.push(status).is_err() {
            debug!("Secondary status table full, dropping slot {}", status.server_index);
        }
    }
}

/// The hot history ring and the server slot that currently owns it
pub struct HistoryState {
    ring: RingStore,
    owner: Option<usize>,
}

impl HistoryState {
    pub fn new(capacity: usize, flush_threshold: usize) -> Self {
        Self {
            ring: RingStore::new(capacity, flush_threshold),
            owner: None,
        }
    }

    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    pub fn ring(&self) -> &RingStore {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut RingStore {
        &mut self.ring
    }

    /// Append a sample on behalf of `slot`
    ///
    /// Fails with [`HistoryError::NotOwner`] while another slot (or nobody,
    /// during a switch) owns the ring.
    pub fn append_for(&mut self, slot: usize, sample: Sample) -> Result<bool, HistoryError> {
        if self.owner != Some(slot) {
            return Err(HistoryError::NotOwner);
        }
        Ok(self.ring.append(sample))
    }

    /// Give up ownership, returning the previous owner
    pub fn release(&mut self) -> Option<usize> {
        self.owner.take()
    }

    /// Replace the contents with `samples` and hand the ring to `slot`
    pub fn install(&mut self, slot: usize, samples: &[Sample]) {
        self.ring.restore(samples);
        self.owner = Some(slot);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UiState {
    pub history_range: HistoryRange,
    pub alert: AlertState,
}

/// Main application state container
pub struct AppState {
    pub run_state: AppRunState,
    pub settings: Settings,
    pub runtime: RuntimeState,
    pub history: HistoryState,
    pub trends: TrendTracker,
    pub ui: UiState,
}

impl AppState {
    pub fn new(config: &TrackerConfig, settings: Settings) -> Self {
        Self {
            run_state: AppRunState::Booting,
            settings,
            runtime: RuntimeState::default(),
            history: HistoryState::new(config.history_capacity, config.save_interval),
            trends: TrendTracker::new(config.trend_window_secs),
            ui: UiState::default(),
        }
    }
}

/// [`AppState`] behind a bounded-wait lock
pub struct SharedState<L> {
    lock: L,
    timeout: Duration,
}

impl<L: BoundedLock<Target = AppState>> SharedState<L> {
    pub fn new(lock: L, timeout: Duration) -> Self {
        Self { lock, timeout }
    }

    /// The underlying lock (tests use it to inject failures)
    pub fn lock(&self) -> &L {
        &self.lock
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `f` on the state if the lock is available within the default timeout
    pub async fn with<R>(&self, f: impl FnOnce(&mut AppState) -> R) -> LockOutcome<R> {
        self.with_timeout(self.timeout, f).await
    }

    pub async fn with_timeout<R>(
        &self,
        timeout: Duration,
        f: impl FnOnce(&mut AppState) -> R,
    ) -> LockOutcome<R> {
        match self.lock.acquire(timeout).await {
            Ok(mut guard) => LockOutcome::Applied(f(&mut *guard)),
            Err(failure) => {
                debug!("State update skipped: {:?}", failure);
                failure.into()
            }
        }
    }

    pub async fn set_wifi_connected(&self, connected: bool) -> LockOutcome<()> {
        self.with(|state| state.runtime.wifi_connected = connected)
            .await
    }

    pub async fn request_refresh(&self) -> LockOutcome<()> {
        self.with(|state| state.runtime.refresh_requested = true)
            .await
    }

    /// Consume a pending refresh request
    pub async fn take_refresh_request(&self) -> LockOutcome<bool> {
        self.with(|state| core::mem::take(&mut state.runtime.refresh_requested))
            .await
    }

    pub async fn cycle_history_range(&self) -> LockOutcome<HistoryRange> {
        self.with(|state| {
            state.ui.history_range = state.ui.history_range.next();
            state.ui.history_range
        })
        .await
    }

    pub async fn trend(&self, slot: usize, now: u32) -> LockOutcome<Result<i32, HistoryError>> {
        self.with(|state| state.trends.trend(slot, now)).await
    }

    /// Countdown of the active server's next restart, see
    /// [`RestartLog::predict_countdown`](crate::restart::RestartLog::predict_countdown)
    pub async fn predict_countdown(&self, now: u32, utc_offset_secs: i32) -> LockOutcome<i32> {
        self.with(|state| {
            state.settings.active_server().map_or(-1, |server| {
                server
                    .restart_log
                    .predict_countdown(&server.schedule, now, utc_offset_secs)
            })
        })
        .await
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Storage(StorageError),
    #[error("History error: {0}")]
    History(HistoryError),
    #[error("Settings error: {0}")]
    Settings(SettingsError),
    #[error("Query failed: {0}")]
    Query(QueryError),
    #[error("State lock unavailable: {0:?}")]
    Lock(LockFailure),
}

impl From<StorageError> for AppError {
    fn from(error: StorageError) -> Self {
        Self::Storage(error)
    }
}

impl From<HistoryError> for AppError {
    fn from(error: HistoryError) -> Self {
        Self::History(error)
    }
}

impl From<SettingsError> for AppError {
    fn from(error: SettingsError) -> Self {
        Self::Settings(error)
    }
}

impl From<QueryError> for AppError {
    fn from(error: QueryError) -> Self {
        Self::Query(error)
    }
}

impl From<LockFailure> for AppError {
    fn from(failure: LockFailure) -> Self {
        Self::Lock(failure)
    }
}

/// Build a fixed-capacity string, cutting `value` at the last whole character
/// that fits
pub trait TruncateFrom<T> {
    fn truncate_from(value: T) -> Self;
}

impl<'a, const N: usize> TruncateFrom<&'a str> for String<N> {
    fn truncate_from(value: &'a str) -> Self {
        let mut out = String::new();
        for c in value.chars() {
            if out.push(c).is_err() {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    fn shared() -> SharedState<FaultInjectingLock<AppState>> {
        let config = TrackerConfig {
            history_capacity: 16,
            ..TrackerConfig::default()
        };
        SharedState::new(
            FaultInjectingLock::new(AppState::new(&config, Settings::default())),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_run_state_from_inputs() {
        assert_eq!(AppRunState::from_inputs(false, true), AppRunState::Offline);
        assert_eq!(AppRunState::from_inputs(true, false), AppRunState::WaitingForTime);
        assert_eq!(AppRunState::from_inputs(true, true), AppRunState::Tracking);
    }

    #[test]
    fn test_append_requires_owner() {
        let mut history = HistoryState::new(8, 4);
        assert_eq!(
            history.append_for(0, Sample::new(1, 1)),
            Err(HistoryError::NotOwner)
        );
        history.install(0, &[Sample::new(1, 1)]);
        assert_eq!(history.append_for(0, Sample::new(2, 2)), Ok(false));
        assert_eq!(
            history.append_for(1, Sample::new(3, 3)),
            Err(HistoryError::NotOwner)
        );
        assert_eq!(history.release(), Some(0));
        assert_eq!(history.ring().len(), 2, "Release keeps the samples");
    }

    #[test]
    fn test_skipped_update_leaves_state_untouched() {
        let shared = shared();
        block_on(async {
            shared.lock().fail_next(LockFailure::Timeout);
            assert_eq!(shared.request_refresh().await, LockOutcome::SkippedTimeout);

            shared.lock().fail_next(LockFailure::Contention);
            assert_eq!(shared.set_wifi_connected(true).await, LockOutcome::SkippedContention);

            let snapshot = shared
                .with(|state| (state.runtime.refresh_requested, state.runtime.wifi_connected))
                .await;
            assert_eq!(snapshot, LockOutcome::Applied((false, false)));
        });
    }

    #[test]
    fn test_refresh_request_is_consumed() {
        let shared = shared();
        block_on(async {
            assert!(shared.request_refresh().await.is_applied());
            assert_eq!(shared.take_refresh_request().await, LockOutcome::Applied(true));
            assert_eq!(shared.take_refresh_request().await, LockOutcome::Applied(false));
        });
    }

    #[test]
    fn test_secondary_status_replaced_in_place() {
        let mut runtime = RuntimeState::default();
        let status = |players| SecondaryStatus {
            server_index: 2,
            players,
            max_players: 60,
            valid: true,
            last_update: 0,
        };
        runtime.set_secondary(status(10));
        runtime.set_secondary(status(12));
        assert_eq!(runtime.secondary.len(), 1);
        assert_eq!(runtime.secondary_for(2).map(|s| s.players), Some(12));
    }

    #[test]
    fn test_truncate_from_respects_char_boundary() {
        let name: String<4> = String::truncate_from("abcdef");
        assert_eq!(name.as_str(), "abcd");
        let name: String<3> = String::truncate_from("aé€");
        assert_eq!(name.as_str(), "aé");
    }
}
