//! Tracked servers and user preferences, persisted to NVS

use heapless::{String, Vec};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use super::TruncateFrom;
use crate::config::{
    DEFAULT_ALERT_THRESHOLD, DEFAULT_MAX_PLAYERS, DEFAULT_REFRESH_INTERVAL_SECS,
    DEFAULT_SERVER_ID, DEFAULT_SERVER_NAME, MAX_SECONDARY_SLOTS, MAX_SERVERS,
    clamp_refresh_interval,
};
use crate::restart::{RestartLog, RestartSchedule};
use crate::storage::{KeyValueStore, SlotRef, StorageError};

pub type ServerId = String<32>;
pub type DisplayName = String<64>;

/// NVS key holding the postcard-encoded [`Settings`]
pub const SETTINGS_KEY: &str = "settings";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Server list is full")]
    Full,
    #[error("Cannot delete the last server")]
    LastServer,
    #[error("Invalid server slot {0}")]
    InvalidSlot(usize),
    #[error("Server id must be 1-31 digits")]
    InvalidServerId,
    #[error("Settings storage error: {0}")]
    Storage(StorageError),
    #[error("Settings encoding failed")]
    Encode,
}

impl From<StorageError> for SettingsError {
    fn from(error: StorageError) -> Self {
        Self::Storage(error)
    }
}

/// One tracked server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerSlot {
    /// BattleMetrics server id
    pub server_id: ServerId,
    pub display_name: DisplayName,
    pub ip_address: String<32>,
    pub port: u16,
    pub max_players: u16,
    /// Alert when players reach this count, 0 disables
    pub alert_threshold: u16,
    pub alerts_enabled: bool,
    pub restart_log: RestartLog,
    pub schedule: RestartSchedule,
}

impl ServerSlot {
    pub fn new(server_id: &str, display_name: &str) -> Self {
        Self {
            server_id: ServerId::truncate_from(server_id),
            display_name: DisplayName::truncate_from(display_name),
            ip_address: String::new(),
            port: 0,
            max_players: DEFAULT_MAX_PLAYERS,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            alerts_enabled: false,
            restart_log: RestartLog::default(),
            schedule: RestartSchedule::default(),
        }
    }

    pub fn slot_ref(&self, index: usize) -> SlotRef<'_> {
        SlotRef {
            index,
            server_id: &self.server_id,
        }
    }
}

const SERVER_ID_MAX_LEN: usize = 31;

fn valid_server_id(id: &str) -> bool {
    (1..=SERVER_ID_MAX_LEN).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    servers: Vec<ServerSlot, MAX_SERVERS>,
    active: usize,
    refresh_interval_secs: u16,
    pub first_boot: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let mut server = ServerSlot::new(DEFAULT_SERVER_ID, DEFAULT_SERVER_NAME);
        server.ip_address = String::truncate_from("5.62.99.20");
        server.port = 11400;

        let mut servers = Vec::new();
        let _ = servers.push(server);
        Self {
            servers,
            active: 0,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            first_boot: true,
        }
    }
}

impl Settings {
    pub fn servers(&self) -> &[ServerSlot] {
        &self.servers
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn server(&self, index: usize) -> Option<&ServerSlot> {
        self.servers.get(index)
    }

    pub fn server_mut(&mut self, index: usize) -> Option<&mut ServerSlot> {
        self.servers.get_mut(index)
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_server(&self) -> Option<&ServerSlot> {
        self.servers.get(self.active)
    }

    pub fn active_server_mut(&mut self) -> Option<&mut ServerSlot> {
        self.servers.get_mut(self.active)
    }

    pub fn refresh_interval_secs(&self) -> u16 {
        self.refresh_interval_secs
    }

    pub fn set_refresh_interval(&mut self, secs: u16) {
        self.refresh_interval_secs = clamp_refresh_interval(secs);
    }

    /// Add a server and make it active
    pub fn add_server(&mut self, server_id: &str, display_name: &str) -> Result<usize, SettingsError> {
        if !valid_server_id(server_id) {
            return Err(SettingsError::InvalidServerId);
        }
        let index = self.servers.len();
        self.servers
            .push(ServerSlot::new(server_id, display_name))
            .map_err(|_| SettingsError::Full)?;
        self.active = index;
        info!("Server added: {} (idx={})", display_name, index);
        Ok(index)
    }

    /// Delete a server, returning the (possibly moved) active index
    ///
    /// Slots after `index` shift down by one.
    pub fn delete_server(&mut self, index: usize) -> Result<usize, SettingsError> {
        if self.servers.len() <= 1 {
            warn!("Cannot delete last server");
            return Err(SettingsError::LastServer);
        }
        if index >= self.servers.len() {
            return Err(SettingsError::InvalidSlot(index));
        }
        self.servers.remove(index);
        if self.active > index {
            self.active -= 1;
        }
        self.active = self.active.min(self.servers.len() - 1);
        info!("Server deleted (idx={})", index);
        Ok(self.active)
    }

    pub fn select(&mut self, index: usize) -> Result<(), SettingsError> {
        if index >= self.servers.len() {
            return Err(SettingsError::InvalidSlot(index));
        }
        self.active = index;
        Ok(())
    }

    pub fn next_index(&self) -> usize {
        (self.active + 1) % self.servers.len().max(1)
    }

    pub fn prev_index(&self) -> usize {
        let count = self.servers.len().max(1);
        (self.active + count - 1) % count
    }

    pub fn set_restart_schedule(
        &mut self,
        index: usize,
        schedule: RestartSchedule,
    ) -> Result<(), SettingsError> {
        let server = self
            .servers
            .get_mut(index)
            .ok_or(SettingsError::InvalidSlot(index))?;
        server.schedule = schedule;
        Ok(())
    }

    /// Non-active servers shown next to the main one, in slot order
    pub fn secondary_indices(&self) -> Vec<usize, MAX_SECONDARY_SLOTS> {
        (0..self.servers.len())
            .filter(|&i| i != self.active)
            .take(MAX_SECONDARY_SLOTS)
            .collect()
    }

    /// Repair settings decoded from flash
    fn sanitize(mut self) -> Self {
        if self.servers.is_empty() {
            return Self::default();
        }
        self.active = self.active.min(self.servers.len() - 1);
        self.refresh_interval_secs = clamp_refresh_interval(self.refresh_interval_secs);
        self
    }
}

/// Load settings from NVS, falling back to defaults
pub fn load_settings<K: KeyValueStore>(nvs: &mut K) -> Settings {
    let settings = match nvs.get_blob(SETTINGS_KEY) {
        Ok(Some(bytes)) => match postcard::from_bytes::<Settings>(&bytes) {
            Ok(settings) => settings.sanitize(),
            Err(e) => {
                warn!("Settings blob undecodable ({:?}), using defaults", e);
                Settings::default()
            }
        },
        Ok(None) => Settings::default(),
        Err(e) => {
            warn!("Settings unavailable ({:?}), using defaults", e);
            Settings::default()
        }
    };
    info!(
        "Settings loaded: {} servers, refresh={}s, first_boot={}",
        settings.server_count(),
        settings.refresh_interval_secs(),
        settings.first_boot
    );
    settings
}

pub fn save_settings<K: KeyValueStore>(nvs: &mut K, settings: &Settings) -> Result<(), SettingsError> {
    let bytes = postcard::to_allocvec(settings).map_err(|_| SettingsError::Encode)?;
    nvs.set_blob(SETTINGS_KEY, &bytes)?;
    nvs.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryKeyValueStore;

    fn with_servers(n: usize) -> Settings {
        let mut settings = Settings::default();
        for i in 1..n {
            let id = ServerId::truncate_from(["1", "2", "3", "4", "5"][i]);
            let _ = settings.add_server(&id, "srv");
        }
        settings
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server_count(), 1);
        assert_eq!(
            settings.active_server().map(|s| s.server_id.as_str()),
            Some(DEFAULT_SERVER_ID)
        );
        assert_eq!(settings.refresh_interval_secs(), 30);
    }

    #[test]
    fn test_add_makes_active_until_full() {
        let mut settings = with_servers(MAX_SERVERS);
        assert_eq!(settings.active_index(), MAX_SERVERS - 1);
        assert_eq!(settings.add_server("9", "x"), Err(SettingsError::Full));
    }

    #[test]
    fn test_rejects_bad_server_id() {
        let mut settings = Settings::default();
        assert_eq!(settings.add_server("", "x"), Err(SettingsError::InvalidServerId));
        assert_eq!(
            settings.add_server("../etc", "x"),
            Err(SettingsError::InvalidServerId)
        );
    }

    #[test]
    fn test_delete_shifts_and_clamps() {
        let mut settings = with_servers(3);
        assert_eq!(settings.active_index(), 2);
        assert_eq!(settings.delete_server(2), Ok(1), "Active clamps to the new end");

        let mut settings = with_servers(3);
        let _ = settings.select(2);
        assert_eq!(settings.delete_server(0), Ok(1), "Active follows its server");
        assert_eq!(
            settings.active_server().map(|s| s.server_id.as_str()),
            Some("2")
        );
    }

    #[test]
    fn test_cannot_delete_last() {
        let mut settings = Settings::default();
        assert_eq!(settings.delete_server(0), Err(SettingsError::LastServer));
    }

    #[test]
    fn test_secondary_indices_skip_active() {
        let mut settings = with_servers(5);
        let _ = settings.select(1);
        assert_eq!(settings.secondary_indices().as_slice(), &[0, 2, 3]);
        assert_eq!(settings.next_index(), 2);
        let _ = settings.select(0);
        assert_eq!(settings.prev_index(), 4);
    }

    #[test]
    fn test_refresh_interval_clamped() {
        let mut settings = Settings::default();
        settings.set_refresh_interval(5);
        assert_eq!(settings.refresh_interval_secs(), 10);
    }

    #[test]
    fn test_nvs_round_trip_resets_edge_detector() {
        let mut nvs = MemoryKeyValueStore::new();
        let mut settings = with_servers(2);
        if let Some(server) = settings.server_mut(0) {
            server.restart_log.detect(30, 1_730_000_000);
            server.restart_log.detect(0, 1_730_000_060);
        }
        assert_eq!(save_settings(&mut nvs, &settings), Ok(()));

        let loaded = load_settings(&mut nvs);
        let log = &loaded.servers()[0].restart_log;
        assert_eq!(log.restart_count(), 1);
        assert_eq!(log.last_known_players(), -1);
        assert_eq!(loaded.server_count(), 2);
    }

    #[test]
    fn test_garbage_blob_yields_defaults() {
        let mut nvs = MemoryKeyValueStore::new();
        let _ = nvs.set_blob(SETTINGS_KEY, &[0xFF; 3]);
        assert_eq!(load_settings(&mut nvs), Settings::default());
    }
}
