//! Poller for the servers shown next to the active one

use heapless::Vec;
use log::{debug, info, warn};

use super::TrackerContext;
use super::api::ServerApi;
use crate::app_state::{AppState, BoundedLock, SecondaryStatus, ServerId};
use crate::config::MAX_SECONDARY_SLOTS;
use crate::storage::{FileSystem, KeyValueStore, SlotRef, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecondaryReport {
    pub polled: usize,
    pub failed: usize,
    /// Samples written to the journal
    pub journaled: usize,
}

/// Query every secondary server once
///
/// Secondary `n` (in slot order, skipping the active server) feeds trend
/// slot `n + 1`.
pub async fn poll_secondaries<L, F, K, A>(ctx: &TrackerContext<'_, L, F, K, A>) -> SecondaryReport
where
    L: BoundedLock<Target = AppState>,
    F: FileSystem,
    K: KeyValueStore,
    A: ServerApi,
{
    let mut report = SecondaryReport::default();

    let targets = ctx
        .state
        .with(|state| {
            state
                .settings
                .secondary_indices()
                .into_iter()
                .filter_map(|index| {
                    let server = state.settings.server(index)?;
                    Some((index, server.server_id.clone()))
                })
                .collect::<Vec<(usize, ServerId), MAX_SECONDARY_SLOTS>>()
        })
        .await;
    let Some(targets) = targets.applied() else {
        warn!("Secondary poll skipped, state busy");
        return report;
    };
    if targets.is_empty() {
        return report;
    }
    info!("Fetching {} secondary servers", targets.len());

    for (position, (index, server_id)) in targets.iter().enumerate() {
        report.polled += 1;
        let status = match ctx.api.query(server_id).await {
            Ok(status) => status,
            Err(e) => {
                // Keep showing the last good data
                warn!("Failed to fetch secondary {} ({}): {}", position, server_id, e);
                report.failed += 1;
                continue;
            }
        };

        let now = ctx.clock.now_unix();
        let players = status.player_count;
        let applied = ctx
            .state
            .with(|state| {
                let current = state.settings.server(*index).map(|s| &s.server_id);
                if current != Some(server_id) || state.settings.active_index() == *index {
                    return false;
                }
                state.runtime.set_secondary(SecondaryStatus {
                    server_index: *index,
                    players,
                    max_players: status.max_players,
                    valid: players >= 0,
                    last_update: now,
                });
                let _ = state.trends.add_point(position + 1, now, players);
                true
            })
            .await;
        if !matches!(applied.applied(), Some(true)) {
            debug!("Secondary {} changed while polling, dropping result", index);
            continue;
        }

        let slot = SlotRef {
            index: *index,
            server_id: server_id.as_str(),
        };
        match ctx.history.record_secondary(slot, players).await {
            Ok(()) if players >= 0 => report.journaled += 1,
            Ok(()) | Err(StorageError::NotMounted) => {}
            Err(e) => warn!("Journal for secondary {} failed: {:?}", index, e),
        }
        info!("Secondary {} ({}): {}/{} players", position, server_id, players, status.max_players);
    }
    report
}
