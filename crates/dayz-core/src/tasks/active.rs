//! Active server poller

use log::{info, warn};

use super::TrackerContext;
use super::api::{QueryError, ServerApi, ServerStatus};
use crate::alerts::{AlertKind, AlertTransition};
use crate::app_state::{AppError, AppState, BoundedLock, ServerId};
use crate::restart::RecordOutcome;
use crate::storage::coordinator::AppendOutcome;
use crate::storage::{FileSystem, KeyValueStore, SlotRef};
use crate::trend::MAIN_SLOT;

/// Result of one active poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivePoll {
    Updated {
        players: i16,
        alert: AlertTransition,
        restart: Option<RecordOutcome>,
        append: AppendOutcome,
    },
    /// WiFi down, nothing queried
    Offline,
    /// The active server changed while the query was in flight
    Stale,
}

/// Query the active server and feed history, trend, alerts and restart
/// detection
pub async fn poll_active<L, F, K, A>(ctx: &TrackerContext<'_, L, F, K, A>) -> Result<ActivePoll, AppError>
where
    L: BoundedLock<Target = AppState>,
    F: FileSystem,
    K: KeyValueStore,
    A: ServerApi,
{
    let (index, server_id, online) = ctx
        .state
        .with(|state| {
            let index = state.settings.active_index();
            let server_id = state
                .settings
                .active_server()
                .map(|s| s.server_id.clone())
                .unwrap_or_default();
            (index, server_id, state.runtime.wifi_connected)
        })
        .await
        .into_result()?;

    if !online {
        warn!("WiFi not connected, skipping query");
        return Ok(ActivePoll::Offline);
    }

    let result = match ctx.api.query(&server_id).await {
        Ok(status) if status.player_count < 0 => Err(QueryError::InvalidResponse),
        other => other,
    };
    let status = match result {
        Ok(status) => status,
        Err(e) => {
            warn!("Query for {} failed: {}", server_id, e);
            let _ = ctx
                .state
                .with(|state| state.runtime.health.record_failure(e))
                .await;
            return Err(e.into());
        }
    };

    let now = ctx.clock.now_unix();
    let players = status.player_count;
    let updated = ctx
        .state
        .with(|state| apply_status(state, index, &server_id, status, now))
        .await
        .into_result()?;
    let Some((alert, restart)) = updated else {
        return Ok(ActivePoll::Stale);
    };

    let slot = SlotRef {
        index,
        server_id: &server_id,
    };
    let append = ctx.history.add_entry(slot, players).await;

    if let Some(RecordOutcome::Recorded { .. }) = restart {
        if let Err(e) = ctx.persist_settings().await {
            warn!("Saving restart history failed: {}", e);
        }
    }

    Ok(ActivePoll::Updated {
        players,
        alert,
        restart,
        append,
    })
}

/// Apply a fresh status to the state, `None` if `index` no longer holds
/// `server_id` or is no longer active
fn apply_status(
    state: &mut AppState,
    index: usize,
    server_id: &ServerId,
    status: ServerStatus,
    now: u32,
) -> Option<(AlertTransition, Option<RecordOutcome>)> {
    if state.settings.active_index() != index {
        return None;
    }
    let server = state.settings.active_server_mut()?;
    if &server.server_id != server_id {
        return None;
    }

    let players = status.player_count;
    if status.max_players > 0 {
        server.max_players = status.max_players;
    }
    if !status.ip_address.is_empty() {
        server.ip_address = status.ip_address.clone();
        server.port = status.port;
    }

    let assessed = if server.alerts_enabled {
        AlertKind::assess(players, server.max_players, server.alert_threshold)
    } else {
        None
    };
    let restart = server.restart_log.detect(players, now);

    info!("Players: {}/{}", players, status.max_players);
    state.runtime.status = Some(status);
    state.runtime.last_update = now;
    state.runtime.health.record_success(now);
    let _ = state.trends.add_point(MAIN_SLOT, now, players);
    let alert = state.ui.alert.update(assessed);

    Some((alert, restart))
}
