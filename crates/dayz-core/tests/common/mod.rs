//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;

use dayz_core::app_state::{AppState, FaultInjectingLock, Settings, SharedState, TimedMutex};
use dayz_core::clock::ManualClock;
use dayz_core::config::{DEFAULT_SERVER_ID, TrackerConfig};
use dayz_core::storage::memory::{MemoryFileSystem, MemoryKeyValueStore};
use dayz_core::storage::{SharedStorage, Storage};
use dayz_core::tasks::api::{QueryError, ServerApi, ServerStatus};
use embassy_time::Duration;

/// 2024-11-05 00:00:00 UTC
pub const T0: u32 = 1_730_764_800;

pub const SECOND_ID: &str = "111";
pub const THIRD_ID: &str = "222";

pub type State = SharedState<FaultInjectingLock<AppState>>;
pub type Store = SharedStorage<MemoryFileSystem, MemoryKeyValueStore>;

pub fn config() -> TrackerConfig {
    TrackerConfig {
        history_capacity: 32,
        save_interval: 4,
        nvs_history_max: 16,
        storage_lock_timeout_ms: 1000,
        utc_offset_secs: 0,
        ..TrackerConfig::default()
    }
}

/// Default server plus `extra` ids, the first one active
pub fn settings(extra: &[&str]) -> Settings {
    let mut settings = Settings::default();
    for (i, id) in extra.iter().enumerate() {
        let name = format!("server {}", i + 1);
        settings.add_server(id, &name).expect("valid server");
    }
    settings.select(0).expect("slot 0 exists");
    settings
}

pub fn state(config: &TrackerConfig, settings: Settings) -> State {
    SharedState::new(
        FaultInjectingLock::new(AppState::new(config, settings)),
        Duration::from_millis(10),
    )
}

pub fn storage() -> Store {
    TimedMutex::new(Storage::new(MemoryFileSystem::new(), MemoryKeyValueStore::new()))
}

pub fn clock() -> ManualClock {
    ManualClock::new(T0)
}

pub fn server_id(index: usize) -> &'static str {
    match index {
        0 => DEFAULT_SERVER_ID,
        1 => SECOND_ID,
        _ => THIRD_ID,
    }
}

pub fn status(players: i16) -> ServerStatus {
    ServerStatus {
        player_count: players,
        max_players: 60,
        ..ServerStatus::default()
    }
}

/// API answering from a per-server script of player counts
///
/// Each query pops the next answer; the last one repeats.
#[derive(Default)]
pub struct ScriptedApi {
    answers: RefCell<HashMap<String, Vec<Result<i16, QueryError>>>>,
    queries: RefCell<Vec<String>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, server_id: &str, answers: &[Result<i16, QueryError>]) {
        let mut reversed = answers.to_vec();
        reversed.reverse();
        self.answers
            .borrow_mut()
            .insert(server_id.to_string(), reversed);
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.borrow().clone()
    }
}

impl ServerApi for ScriptedApi {
    async fn query(&self, server_id: &str) -> Result<ServerStatus, QueryError> {
        self.queries.borrow_mut().push(server_id.to_string());
        let mut answers = self.answers.borrow_mut();
        let script = answers.get_mut(server_id).ok_or(QueryError::Http(404))?;
        let answer = if script.len() > 1 {
            script.pop()
        } else {
            script.last().copied()
        };
        answer.unwrap_or(Err(QueryError::InvalidResponse)).map(status)
    }
}
