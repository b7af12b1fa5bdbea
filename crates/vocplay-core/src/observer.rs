//! Bitrate and buffering observer
//!
//! Decides which buffering and bitrate notifications are worth reporting.
//! Adaptive engines cycle through levels while the buffer refills and seeks
//! cause buffering on purpose; neither is a user-visible quality problem.

use crate::telemetry::TelemetryEvent;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Observer state, one per supervised player
#[derive(Debug, Clone)]
pub struct PlaybackObserver {
    buffering: bool,
    last_bitrate: Option<f64>,
    last_seek: Option<Instant>,
    seek_grace: Duration,
}

impl PlaybackObserver {
    pub fn new(seek_grace: Duration) -> Self {
        Self {
            buffering: false,
            last_bitrate: None,
            last_seek: None,
            seek_grace,
        }
    }

    pub fn seek_grace(&self) -> Duration {
        self.seek_grace
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn last_bitrate(&self) -> Option<f64> {
        self.last_bitrate
    }

    pub fn on_seek(&mut self, now: Instant) {
        self.last_seek = Some(now);
    }

    /// Buffering started, reported unless a seek just happened
    pub fn on_buffering_start(&mut self, now: Instant) -> Option<TelemetryEvent> {
        self.buffering = true;

        let seeking = self
            .last_seek
            .is_some_and(|at| now.saturating_duration_since(at) <= self.seek_grace);
        if seeking {
            debug!("Buffering after seek, not reported");
            return None;
        }
        Some(TelemetryEvent::Buffering)
    }

    pub fn on_buffer_full(&mut self) {
        self.buffering = false;
    }

    /// New bitrate sample, reported when it is a real switch outside buffering
    pub fn on_bitrate_changed(&mut self, bitrate: Option<f64>) -> Option<TelemetryEvent> {
        let bitrate = bitrate.filter(|b| b.is_finite() && *b > 0.0);
        let previous = std::mem::replace(&mut self.last_bitrate, bitrate);

        // First usable sample is the baseline
        let (previous, current) = match (previous, bitrate) {
            (Some(previous), Some(current)) => (previous, current),
            _ => return None,
        };

        if current == previous {
            return None;
        }

        let is_up = current - previous > 0.0;
        if self.buffering {
            debug!(from = previous, to = current, "Bitrate switch while buffering, not reported");
            return None;
        }
        Some(TelemetryEvent::QualitySwitch { is_up })
    }
}

impl Default for PlaybackObserver {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
