//! Desktop simulator for the DayZ server tracker.
//!
//! Runs the dayz-core workers and event loop against a mock BattleMetrics
//! API, RAM-backed flash and SD card, and a simulated clock, so a day of
//! tracking can be replayed in a second.
//!
//! # Scripted UI events
//!
//! | Minute | Event                          |
//! |--------|--------------------------------|
//! | 30     | Next server                    |
//! | 60     | Promote first secondary        |
//! | 90     | Cycle history range            |
//! | 120    | Add server                     |
//! | 150    | Delete the added server        |
//! | 180    | Manual restart schedule        |
//!
//! The summary at the end includes the busiest period of the weekly heatmap.
//!
//! `RUST_LOG=debug` shows every flush, restore and lock skip.

use std::cell::Cell;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use embassy_futures::block_on;
use log::{error, info, warn};

use dayz_core::app_state::{
    AppState, BoundedLock, FaultInjectingLock, LockFailure, SharedState, TimedMutex, TruncateFrom,
    load_settings,
};
use dayz_core::clock::{Clock, ManualClock};
use dayz_core::config::{TIMESTAMP_MIN_VALID, TrackerConfig};
use dayz_core::heatmap::{PERIOD_LABELS, WEEKDAY_LABELS};
use dayz_core::restart::{RestartSchedule, format_countdown};
use dayz_core::storage::memory::{MemoryFileSystem, MemoryKeyValueStore};
use dayz_core::storage::{SharedStorage, Storage};
use dayz_core::tasks::api::{QueryError, ServerApi, ServerStatus};
use dayz_core::tasks::events::{AppEvent, EventLoop, event_receiver, event_sender};
use dayz_core::tasks::{TrackerContext, WorkerSchedule};
use dayz_core::trend::MAIN_SLOT;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "dayz-simulator", about = "Replay DayZ tracker workers against a mock API")]
struct Args {
    /// Simulated minutes to run
    #[arg(short, long, default_value_t = 240)]
    minutes: u32,

    /// Simulated seconds per loop iteration
    #[arg(short, long, default_value_t = 10)]
    step_secs: u32,

    /// Tracker configuration as JSON (missing keys keep their defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fail every N-th state lock acquisition with a timeout
    #[arg(long)]
    flaky_lock: Option<u32>,
}

// ---------------------------------------------------------------------------
// Mock BattleMetrics API
// ---------------------------------------------------------------------------

/// Servers added on first boot besides the default one
const DEMO_SERVERS: [(&str, &str); 2] = [("2004793", "DayZ Underground"), ("4404341", "Namalsk PvE")];

/// Player counts follow a daily sine; each server restarts on a fixed cycle
/// and stays empty for two minutes afterwards.
struct MockBattleMetrics<'a> {
    clock: &'a ManualClock,
    restart_every_secs: u32,
    /// Every N-th query times out
    timeout_every: u32,
    queries: Cell<u32>,
}

impl<'a> MockBattleMetrics<'a> {
    fn new(clock: &'a ManualClock) -> Self {
        Self {
            clock,
            restart_every_secs: 4 * 3600,
            timeout_every: 17,
            queries: Cell::new(0),
        }
    }

    fn players(&self, server_id: &str, now: u32) -> i16 {
        let seed = server_id.bytes().map(u32::from).sum::<u32>();
        let phase = f64::from(seed % 24) * 3600.0;
        let day = 2.0 * std::f64::consts::PI * (f64::from(now) + phase) / 86_400.0;
        let base = 30.0 + 25.0 * day.sin() + f64::from(seed % 7);

        let offset = seed % self.restart_every_secs;
        let since_restart = (now + offset) % self.restart_every_secs;
        if since_restart < 120 {
            return 0;
        }
        base.clamp(0.0, 60.0) as i16
    }
}

impl ServerApi for MockBattleMetrics<'_> {
    async fn query(&self, server_id: &str) -> Result<ServerStatus, QueryError> {
        let n = self.queries.get() + 1;
        self.queries.set(n);
        if n % self.timeout_every == 0 {
            return Err(QueryError::Timeout);
        }
        let now = self.clock.now_unix();
        Ok(ServerStatus {
            player_count: self.players(server_id, now),
            max_players: 60,
            server_time: TruncateFrom::truncate_from("12:00"),
            is_daytime: true,
            map_name: TruncateFrom::truncate_from("chernarusplus"),
            ip_address: TruncateFrom::truncate_from("127.0.0.1"),
            port: 2302,
        })
    }
}

// ---------------------------------------------------------------------------
// Scripted events
// ---------------------------------------------------------------------------

fn scripted_event(minute: u32) -> Option<AppEvent> {
    match minute {
        30 => Some(AppEvent::NextServer),
        60 => Some(AppEvent::SelectSecondary(0)),
        90 => Some(AppEvent::CycleHistoryRange),
        120 => Some(AppEvent::AddServer {
            server_id: TruncateFrom::truncate_from("1234567"),
            display_name: TruncateFrom::truncate_from("Simulated Server"),
        }),
        150 => Some(AppEvent::DeleteServer(3)),
        180 => RestartSchedule::manual(6, 0, 4)
            .ok()
            .map(|schedule| AppEvent::SetRestartSchedule { index: 0, schedule }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn load_config(path: Option<&PathBuf>) -> TrackerConfig {
    let Some(path) = path else {
        return TrackerConfig::default();
    };
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Cannot read {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };
    match TrackerConfig::from_json(&bytes) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid config {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(args.config.as_ref());
    info!("Starting DayZ tracker simulator ({} minutes)", args.minutes);

    let start = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(TIMESTAMP_MIN_VALID, |d| d.as_secs() as u32);
    let clock = ManualClock::new(start);

    let mut nvs = MemoryKeyValueStore::new();
    let mut settings = load_settings(&mut nvs);
    if settings.first_boot {
        for (server_id, name) in DEMO_SERVERS {
            if let Err(e) = settings.add_server(server_id, name) {
                warn!("Demo server {} not added: {}", server_id, e);
            }
        }
        let _ = settings.select(0);
        settings.first_boot = false;
    }

    let lock = FaultInjectingLock::new(AppState::new(&config, settings));
    if let Some(n) = args.flaky_lock {
        info!("Failing every {} state lock acquisitions", n);
        lock.fail_every(n, LockFailure::Timeout);
    }
    let state = SharedState::new(lock, config.state_lock_timeout());
    let storage: SharedStorage<_, _> = TimedMutex::new(Storage::new(MemoryFileSystem::new(), nvs));
    let api = MockBattleMetrics::new(&clock);
    let ctx = TrackerContext::new(&state, &storage, &api, &clock, &config);

    block_on(async {
        let _ = ctx.state.set_wifi_connected(true).await;
        match ctx.history.restore_active().await {
            Ok(report) => info!("Boot restore: {} samples", report.restored),
            Err(e) => warn!("Boot restore failed: {}", e),
        }

        let refresh = ctx
            .state
            .with(|s| s.settings.refresh_interval_secs())
            .await
            .applied()
            .unwrap_or_default();
        let mut schedule = WorkerSchedule::new(&config, refresh);
        let mut events = EventLoop::new();
        let sender = event_sender();
        let receiver = event_receiver();

        let total_secs = args.minutes * 60;
        let step = args.step_secs.max(1);
        let mut elapsed = 0;
        let mut last_minute = None;
        while elapsed < total_secs {
            let minute = elapsed / 60;
            if last_minute != Some(minute) {
                last_minute = Some(minute);
                if let Some(event) = scripted_event(minute) {
                    info!("Minute {}: {:?}", minute, event);
                    if sender.try_send(event).is_err() {
                        warn!("Event queue full");
                    }
                }
            }

            events.drain(&ctx, &receiver).await;
            let report = ctx.tick(&mut schedule).await;
            if let Some(Err(e)) = report.active {
                warn!("Active poll failed: {}", e);
            }

            clock.advance(step);
            elapsed += step;
        }

        let _ = ctx.history.flush_now().await;
        print_summary(&ctx).await;
    });

    let storage = storage.into_inner();
    info!(
        "Journal files: {}, NVS commits: {}",
        storage.fs.file_names().filter(|name| name.ends_with(".JSL")).count(),
        storage.nvs.commit_count()
    );
    info!("Simulator exiting");
}

async fn print_summary<L, A>(ctx: &TrackerContext<'_, L, MemoryFileSystem, MemoryKeyValueStore, A>)
where
    L: BoundedLock<Target = AppState>,
    A: ServerApi,
{
    let now = ctx.clock.now_unix();
    let countdown = ctx
        .state
        .predict_countdown(now, ctx.config.utc_offset_secs)
        .await
        .applied()
        .unwrap_or(-1);
    let trend = ctx.state.trend(MAIN_SLOT, now).await.applied();
    let summary = ctx
        .state
        .with(|s| {
            let active = s.settings.active_server().map(|server| {
                (
                    server.server_id.clone(),
                    server.display_name.clone(),
                    server.restart_log.restart_count(),
                )
            });
            (
                active,
                s.settings.active_index(),
                s.history.ring().len(),
                s.ui.history_range,
            )
        })
        .await
        .applied();
    let Some((Some((server_id, name, restarts)), active_index, samples, range)) = summary else {
        warn!("State busy, no summary");
        return;
    };

    info!("Active server: {} ({})", name, server_id);
    info!("History: {} samples, range {}", samples, range.label());
    info!("Restarts detected: {}", restarts);
    match countdown {
        c if c >= 0 => info!("Next restart in {}", format_countdown(c)),
        _ => info!("Next restart unknown"),
    }
    match trend {
        Some(Ok(delta)) => info!("Trend: {:+} players", delta),
        _ => info!("Trend: not enough data"),
    }
    match ctx.history.heatmap(active_index).await {
        Ok(heatmap) => match heatmap.busiest() {
            Some((day, period, avg)) => info!(
                "Busiest period: {} {} ({} players on average)",
                WEEKDAY_LABELS[day], PERIOD_LABELS[period], avg
            ),
            None => info!("Heatmap: no journal data"),
        },
        Err(e) => warn!("Heatmap unavailable: {}", e),
    }
}
