//! vocplay core - playback-health supervisor for live stream players
//!
//! This crate keeps a third-party video player alive and reports on it:
//! - Recovery state machine (soft restart, seek-to-live, hard reset)
//! - Jittered exponential backoff for retry pacing
//! - Media reachability probing before playback is retried
//! - Bitrate/buffering observation without false positives
//! - Batched telemetry delivery with retry
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          vocplay core                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │   player events ──▶ ┌──────────────┐ ──▶ ┌──────────────┐        │
//! │                     │  Supervisor  │     │   Recovery   │        │
//! │   reset/rebind ───▶ │  event loop  │ ◀── │   Machine    │        │
//! │                     └──────┬───────┘     └──────┬───────┘        │
//! │                            │                    │                │
//! │                     ┌──────┴───────┐     ┌──────┴───────┐        │
//! │                     │   Observer   │     │ Backoff/Probe│        │
//! │                     └──────┬───────┘     └──────────────┘        │
//! │                            │                                     │
//! │                     ┌──────┴───────┐                             │
//! │                     │  Telemetry   │ ──▶ collector endpoint      │
//! │                     │   Batcher    │                             │
//! │                     └──────────────┘                             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod observer;
pub mod player;
pub mod probe;
pub mod recovery;
pub mod supervisor;
pub mod telemetry;
pub mod types;

pub use backoff::BackoffTimer;
pub use config::{
    BackoffConfig, ErrorClassifier, ErrorCodeRule, ErrorDisposition, ErrorHandler, PlayerOptions,
    SupervisorConfig, TelemetryConfig,
};
pub use error::{Error, Result};
pub use observer::PlaybackObserver;
pub use player::{Playback, Player};
pub use probe::{HttpProbe, MediaProbe};
pub use recovery::{ErrorOutcome, RecoveryAction, RecoveryMachine, RetryToken};
pub use supervisor::{Supervisor, SupervisorHandle};
pub use telemetry::{
    HttpSink, LogSink, TelemetryBatcher, TelemetryContext, TelemetryEvent, TelemetryHandle,
    TelemetryRecord, TelemetrySink,
};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version
pub fn init() {
    tracing::info!(version = VERSION, "vocplay core initialized");
}
