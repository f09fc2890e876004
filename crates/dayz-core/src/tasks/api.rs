//! Boundary to the BattleMetrics client
//!
//! The HTTP + JSON client lives in the firmware; the simulator provides a
//! scripted implementation.

use core::future::Future;

use heapless::String;
use thiserror_no_std::Error;

/// Status of one server as reported by the API
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerStatus {
    /// -1 when the API did not report a count
    pub player_count: i16,
    pub max_players: u16,
    /// In-game time, e.g. "10:12"
    pub server_time: String<16>,
    pub is_daytime: bool,
    pub map_name: String<32>,
    pub ip_address: String<32>,
    pub port: u16,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    #[error("WiFi not connected")]
    NotConnected,
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP status {0}")]
    Http(u16),
    #[error("Invalid response")]
    InvalidResponse,
}

pub trait ServerApi {
    fn query(&self, server_id: &str) -> impl Future<Output = Result<ServerStatus, QueryError>>;
}
