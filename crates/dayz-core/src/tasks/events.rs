//! UI events and the loop that applies them
//!
//! Events update the in-memory state right away so the UI reflects them on
//! the next frame. The history switch they imply is deferred and executed
//! after the queue is drained, keeping the storage I/O out of the input path.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use log::{debug, info, warn};

use super::TrackerContext;
use super::api::{ServerApi, ServerStatus};
use crate::alerts::AlertState;
use crate::app_state::settings::DisplayName;
use crate::app_state::{AppError, AppState, BoundedLock, SecondaryStatus, ServerId, SettingsError};
use crate::restart::RestartSchedule;
use crate::storage::coordinator::{SwitchError, SwitchReport, SwitchStage};
use crate::storage::{FileSystem, KeyValueStore};
use crate::trend::{MAIN_SLOT, TREND_SLOTS};

/// Channel capacity for UI events
pub const EVENT_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    NextServer,
    PrevServer,
    /// Promote the secondary at this position to active
    SelectSecondary(usize),
    AddServer {
        server_id: ServerId,
        display_name: DisplayName,
    },
    DeleteServer(usize),
    SetRestartSchedule {
        index: usize,
        schedule: RestartSchedule,
    },
    ClearRestartHistory(usize),
    SetAlerts {
        index: usize,
        threshold: u16,
        enabled: bool,
    },
    SetRefreshInterval(u16),
    Refresh,
    CycleHistoryRange,
}

pub type EventChannel = Channel<CriticalSectionRawMutex, AppEvent, EVENT_CHANNEL_CAPACITY>;
pub type EventReceiver<'a> = Receiver<'a, CriticalSectionRawMutex, AppEvent, EVENT_CHANNEL_CAPACITY>;

/// Global channel for UI events
pub static EVENT_CHANNEL: EventChannel = Channel::new();

/// Helper to get an event sender
pub fn event_sender() -> Sender<'static, CriticalSectionRawMutex, AppEvent, EVENT_CHANNEL_CAPACITY> {
    EVENT_CHANNEL.sender()
}

/// Helper to get an event receiver
pub fn event_receiver() -> EventReceiver<'static> {
    EVENT_CHANNEL.receiver()
}

/// History switch waiting for the end of the current drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredSwitch {
    pub old: Option<usize>,
    pub new: usize,
    /// Poll the new active server right after switching
    pub refresh: bool,
}

#[derive(Debug, Default)]
pub struct EventLoop {
    deferred: Option<DeferredSwitch>,
}

/// Reset the per-server runtime data when the active server changes
fn reset_for_new_active(state: &mut AppState) {
    state.runtime.reset_active();
    state.runtime.secondary.clear();
    state.trends.clear_all();
    state.ui.alert = AlertState::default();
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deferred(&self) -> Option<DeferredSwitch> {
        self.deferred
    }

    /// Queue a history switch, merging with one already pending
    ///
    /// The ring still belongs to the first pending switch's old slot, so
    /// that is kept unless the new request says the old data is gone.
    pub fn defer(&mut self, old: Option<usize>, new: usize, refresh: bool) {
        let merged = match (self.deferred, old) {
            (Some(pending), Some(_)) => DeferredSwitch {
                old: pending.old,
                new,
                refresh: pending.refresh || refresh,
            },
            (Some(pending), None) => DeferredSwitch {
                old: None,
                new,
                refresh: pending.refresh || refresh,
            },
            (None, old) => DeferredSwitch { old, new, refresh },
        };
        debug!("Deferred switch {:?} -> {}", merged.old, merged.new);
        self.deferred = Some(merged);
    }

    /// Apply one event to the state
    pub async fn handle<L, F, K, A>(
        &mut self,
        ctx: &TrackerContext<'_, L, F, K, A>,
        event: AppEvent,
    ) -> Result<(), AppError>
    where
        L: BoundedLock<Target = AppState>,
        F: FileSystem,
        K: KeyValueStore,
        A: ServerApi,
    {
        debug!("Event: {:?}", event);
        match event {
            nav @ (AppEvent::NextServer | AppEvent::PrevServer) => {
                let forward = nav == AppEvent::NextServer;
                let switched = ctx
                    .state
                    .with(|state| {
                        if state.settings.server_count() < 2 {
                            return None;
                        }
                        let old = state.settings.active_index();
                        let new = if forward {
                            state.settings.next_index()
                        } else {
                            state.settings.prev_index()
                        };
                        state.settings.select(new).ok()?;
                        reset_for_new_active(state);
                        Some((old, new))
                    })
                    .await
                    .into_result()?;
                if let Some((old, new)) = switched {
                    self.defer(Some(old), new, true);
                }
            }
            AppEvent::SelectSecondary(position) => {
                let switched = ctx
                    .state
                    .with(|state| promote_secondary(state, position))
                    .await
                    .into_result()?;
                if let Some((old, new)) = switched {
                    self.defer(Some(old), new, false);
                }
            }
            AppEvent::AddServer {
                server_id,
                display_name,
            } => {
                let added = ctx
                    .state
                    .with(|state| {
                        let old = state.settings.active_index();
                        let new = state.settings.add_server(&server_id, &display_name)?;
                        reset_for_new_active(state);
                        Ok::<_, AppError>((old, new))
                    })
                    .await
                    .into_result()??;
                self.defer(Some(added.0), added.1, true);
                ctx.persist_settings().await?;
            }
            AppEvent::DeleteServer(index) => {
                let pending = self.deferred.is_some();
                let (new, shifted) = ctx
                    .state
                    .with(|state| {
                        let new = state.settings.delete_server(index)?;
                        // An owner at or above the deleted slot now points at
                        // another server
                        let shifted = pending || state.history.owner().is_none_or(|o| o >= index);
                        if shifted {
                            state.history.release();
                            state.history.ring_mut().clear();
                            reset_for_new_active(state);
                        }
                        Ok::<_, AppError>((new, shifted))
                    })
                    .await
                    .into_result()??;
                if let Err(e) = ctx.history.discard_from(index).await {
                    warn!("Discarding snapshots after delete failed: {:?}", e);
                }
                if shifted {
                    self.defer(None, new, true);
                } else {
                    ctx.state
                        .with(|state| {
                            state.runtime.secondary.clear();
                            state.trends.clear_secondary();
                        })
                        .await
                        .into_result()?;
                }
                ctx.persist_settings().await?;
            }
            AppEvent::SetRestartSchedule { index, schedule } => {
                ctx.state
                    .with(|state| state.settings.set_restart_schedule(index, schedule))
                    .await
                    .into_result()??;
                ctx.persist_settings().await?;
            }
            AppEvent::ClearRestartHistory(index) => {
                ctx.state
                    .with(|state| {
                        state
                            .settings
                            .server_mut(index)
                            .map(|server| server.restart_log.clear())
                    })
                    .await
                    .into_result()?
                    .ok_or(SettingsError::InvalidSlot(index))?;
                info!("Restart history cleared for server {}", index);
                ctx.persist_settings().await?;
            }
            AppEvent::SetAlerts {
                index,
                threshold,
                enabled,
            } => {
                ctx.state
                    .with(|state| {
                        state.settings.server_mut(index).map(|server| {
                            server.alert_threshold = threshold;
                            server.alerts_enabled = enabled;
                        })
                    })
                    .await
                    .into_result()?
                    .ok_or(SettingsError::InvalidSlot(index))?;
                ctx.persist_settings().await?;
            }
            AppEvent::SetRefreshInterval(secs) => {
                ctx.state
                    .with(|state| state.settings.set_refresh_interval(secs))
                    .await
                    .into_result()?;
                ctx.persist_settings().await?;
            }
            AppEvent::Refresh => {
                ctx.state.request_refresh().await.into_result()?;
            }
            AppEvent::CycleHistoryRange => {
                let range = ctx.state.cycle_history_range().await.into_result()?;
                debug!("History range: {}", range.label());
            }
        }
        Ok(())
    }

    /// Run the pending history switch, if any
    ///
    /// A switch that could not get the state lock is queued again; the
    /// install stage is retried without saving since the old data is
    /// already on disk.
    pub async fn process_deferred<L, F, K, A>(
        &mut self,
        ctx: &TrackerContext<'_, L, F, K, A>,
    ) -> Option<Result<SwitchReport, SwitchError>>
    where
        L: BoundedLock<Target = AppState>,
        F: FileSystem,
        K: KeyValueStore,
        A: ServerApi,
    {
        let pending = self.deferred.take()?;
        let result = ctx
            .history
            .switch_active_server(pending.old, pending.new)
            .await;
        match result {
            Ok(_) => {
                if let Err(e) = ctx.persist_settings().await {
                    warn!("Saving settings after switch failed: {}", e);
                }
                if pending.refresh {
                    let _ = ctx.state.request_refresh().await;
                }
            }
            Err(SwitchError::Busy { stage }) => {
                warn!("History switch busy at {:?}, retrying", stage);
                let old = match stage {
                    SwitchStage::Barrier => pending.old,
                    SwitchStage::Install => None,
                };
                // A newer request queued meanwhile takes precedence
                if self.deferred.is_none() {
                    self.deferred = Some(DeferredSwitch { old, ..pending });
                }
            }
            Err(e) => warn!("History switch dropped: {}", e),
        }
        Some(result)
    }

    /// Apply every queued event, then the resulting history switch
    ///
    /// Returns the number of events handled.
    pub async fn drain<L, F, K, A>(
        &mut self,
        ctx: &TrackerContext<'_, L, F, K, A>,
        receiver: &EventReceiver<'_>,
    ) -> usize
    where
        L: BoundedLock<Target = AppState>,
        F: FileSystem,
        K: KeyValueStore,
        A: ServerApi,
    {
        let mut handled = 0;
        while let Ok(event) = receiver.try_receive() {
            handled += 1;
            if let Err(e) = self.handle(ctx, event).await {
                warn!("Event failed: {}", e);
            }
        }
        self.process_deferred(ctx).await;
        handled
    }

    /// Wait for events forever (firmware event task)
    pub async fn run<L, F, K, A>(&mut self, ctx: &TrackerContext<'_, L, F, K, A>, receiver: EventReceiver<'_>)
    where
        L: BoundedLock<Target = AppState>,
        F: FileSystem,
        K: KeyValueStore,
        A: ServerApi,
    {
        info!("Event loop started");
        loop {
            let event = receiver.receive().await;
            if let Err(e) = self.handle(ctx, event).await {
                warn!("Event failed: {}", e);
            }
            let _ = self.drain(ctx, &receiver).await;
        }
    }
}

/// Make the secondary at `position` the active server
///
/// Its live data and trend move to the main slot and the old main server
/// takes its place among the secondaries.
fn promote_secondary(state: &mut AppState, position: usize) -> Option<(usize, usize)> {
    let secondaries = state.settings.secondary_indices();
    let new = *secondaries.get(position)?;
    let old = state.settings.active_index();
    let trend_slot = position + 1;

    let promoted = state.runtime.secondary_for(new).copied();
    let demoted = SecondaryStatus {
        server_index: old,
        players: state.runtime.current_players(),
        max_players: state.runtime.status.as_ref().map_or(0, |s| s.max_players),
        valid: state.runtime.current_players() >= 0,
        last_update: state.runtime.last_update,
    };

    state.settings.select(new).ok()?;
    state.ui.alert = AlertState::default();

    state.runtime.reset_active();
    if let Some(status) = promoted.filter(|s| s.valid) {
        state.runtime.status = Some(ServerStatus {
            player_count: status.players,
            max_players: status.max_players,
            ..ServerStatus::default()
        });
        state.runtime.last_update = status.last_update;
    }

    // The old main trend lands in the slot the old server now occupies
    let _ = state.trends.swap(MAIN_SLOT, trend_slot);
    let demoted_position = state
        .settings
        .secondary_indices()
        .iter()
        .position(|&index| index == old);
    state.runtime.secondary.clear();
    match demoted_position {
        Some(p) => {
            if p + 1 != trend_slot {
                let _ = state.trends.swap(trend_slot, p + 1);
            }
            for slot in (1..TREND_SLOTS).filter(|&s| s != p + 1) {
                let _ = state.trends.clear(slot);
            }
            state.runtime.set_secondary(demoted);
        }
        None => state.trends.clear_secondary(),
    }
    info!("Swapped server: {} -> {}", old, new);
    Some((old, new))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defer_merges_keeping_first_owner() {
        let mut events = EventLoop::new();
        events.defer(Some(0), 1, true);
        events.defer(Some(1), 2, false);
        assert_eq!(
            events.deferred(),
            Some(DeferredSwitch {
                old: Some(0),
                new: 2,
                refresh: true
            })
        );
        events.defer(None, 1, false);
        assert_eq!(events.deferred().map(|d| d.old), Some(None), "Delete drops the save");
    }
}
