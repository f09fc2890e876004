//! Background workers and the event loop
//!
//! The firmware runs each worker in its own embassy task; the simulator
//! drives them from a single loop through [`TrackerContext::tick`]. Network
//! and storage I/O only happen here, never while the state lock is held.

pub mod active;
pub mod api;
pub mod events;
pub mod secondary;

use log::{debug, info, warn};

use crate::app_state::{
    AppError, AppRunState, AppState, BoundedLock, SharedState, save_settings,
};
use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::storage::coordinator::HistoryCoordinator;
use crate::storage::{FileSystem, KeyValueStore, SharedStorage, StorageError};

use active::ActivePoll;
use api::ServerApi;
use secondary::SecondaryReport;

/// Journal pruning and card remount checks
pub const MAINTENANCE_INTERVAL_SECS: u32 = 3600;

/// Fixed-interval trigger on the wall clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    interval_secs: u32,
    last: Option<u32>,
}

impl Cadence {
    /// A cadence that is due immediately
    pub const fn new(interval_secs: u32) -> Self {
        Self {
            interval_secs,
            last: None,
        }
    }

    pub fn interval_secs(&self) -> u32 {
        self.interval_secs
    }

    pub fn set_interval(&mut self, interval_secs: u32) {
        self.interval_secs = interval_secs;
    }

    pub fn is_due(&self, now: u32) -> bool {
        self.last
            .is_none_or(|last| now.saturating_sub(last) >= self.interval_secs)
    }

    pub fn mark(&mut self, now: u32) {
        self.last = Some(now);
    }

    /// Make the next check due regardless of the interval
    pub fn force(&mut self) {
        self.last = None;
    }
}

/// Cadences of the periodic workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSchedule {
    pub active: Cadence,
    pub secondary: Cadence,
    pub maintenance: Cadence,
}

impl WorkerSchedule {
    pub fn new(config: &TrackerConfig, refresh_interval_secs: u16) -> Self {
        Self {
            active: Cadence::new(u32::from(refresh_interval_secs)),
            secondary: Cadence::new(u32::from(config.secondary_refresh_secs)),
            maintenance: Cadence::new(MAINTENANCE_INTERVAL_SECS),
        }
    }
}

/// What one [`TrackerContext::tick`] ran
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickReport {
    /// Run state after this tick, `None` if the state lock was unavailable
    pub run_state: Option<AppRunState>,
    pub active: Option<Result<ActivePoll, AppError>>,
    pub secondary: Option<SecondaryReport>,
    pub pruned: Option<Result<usize, StorageError>>,
}

/// Everything a worker needs, passed explicitly instead of globals
pub struct TrackerContext<'a, L, F, K, A> {
    pub state: &'a SharedState<L>,
    pub storage: &'a SharedStorage<F, K>,
    pub history: HistoryCoordinator<'a, L, F, K>,
    pub api: &'a A,
    pub clock: &'a dyn Clock,
    pub config: &'a TrackerConfig,
}

impl<'a, L, F, K, A> TrackerContext<'a, L, F, K, A>
where
    L: BoundedLock<Target = AppState>,
    F: FileSystem,
    K: KeyValueStore,
    A: ServerApi,
{
    pub fn new(
        state: &'a SharedState<L>,
        storage: &'a SharedStorage<F, K>,
        api: &'a A,
        clock: &'a dyn Clock,
        config: &'a TrackerConfig,
    ) -> Self {
        Self {
            state,
            storage,
            history: HistoryCoordinator::new(state, storage, clock, config),
            api,
            clock,
            config,
        }
    }

    /// Write the current settings to NVS
    pub async fn persist_settings(&self) -> Result<(), AppError> {
        let settings = self
            .state
            .with(|state| state.settings.clone())
            .await
            .into_result()?;
        let mut storage = self
            .storage
            .acquire(self.config.storage_lock_timeout())
            .await
            .map_err(|_| StorageError::Busy)?;
        save_settings(&mut storage.nvs, &settings)?;
        debug!("Settings saved");
        Ok(())
    }

    /// Run every worker that is due at the current time
    pub async fn tick(&self, schedule: &mut WorkerSchedule) -> TickReport {
        let now = self.clock.now_unix();
        let synced = self.clock.is_synced();
        let mut report = TickReport::default();

        let (refresh_secs, refresh_requested) = self
            .state
            .with(|state| {
                let run_state = AppRunState::from_inputs(state.runtime.wifi_connected, synced);
                if run_state != state.run_state {
                    info!("Run state {:?} -> {:?}", state.run_state, run_state);
                    state.run_state = run_state;
                }
                report.run_state = Some(run_state);
                (
                    state.settings.refresh_interval_secs(),
                    core::mem::take(&mut state.runtime.refresh_requested),
                )
            })
            .await
            .applied()
            .unwrap_or((0, false));
        if refresh_secs > 0 {
            schedule.active.set_interval(u32::from(refresh_secs));
        }
        if refresh_requested {
            schedule.active.force();
            schedule.secondary.force();
        }

        if schedule.active.is_due(now) {
            schedule.active.mark(now);
            report.active = Some(active::poll_active(self).await);
        }
        if schedule.secondary.is_due(now) {
            schedule.secondary.mark(now);
            report.secondary = Some(secondary::poll_secondaries(self).await);
        }
        if schedule.maintenance.is_due(now) {
            schedule.maintenance.mark(now);
            let pruned = self.history.maintain().await;
            if let Err(e) = pruned {
                if e != StorageError::NotMounted {
                    warn!("Maintenance failed: {:?}", e);
                }
            }
            report.pruned = Some(pruned);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence() {
        let mut cadence = Cadence::new(30);
        assert!(cadence.is_due(100), "Due before the first run");
        cadence.mark(100);
        assert!(!cadence.is_due(129));
        assert!(cadence.is_due(130));
        cadence.force();
        assert!(cadence.is_due(101));
    }

    #[test]
    fn test_clock_going_backwards_is_not_due() {
        let mut cadence = Cadence::new(30);
        cadence.mark(1000);
        assert!(!cadence.is_due(900));
    }
}
