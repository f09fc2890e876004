//! Hardware-independent core library for the DayZ server tracker
//!
//! This crate contains all platform-agnostic logic of the tracker appliance:
//! the shared application state and its bounded-wait lock, the in-memory
//! player-count history with its three persistence backends (NVS flash,
//! binary snapshot, daily JSON journal), trend and weekly heatmap analytics,
//! restart prediction and the polling workers that feed them.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod alerts;
pub mod app_state;
pub mod clock;
pub mod config;
pub mod heatmap;
pub mod restart;
pub mod storage;
pub mod tasks;
pub mod trend;
