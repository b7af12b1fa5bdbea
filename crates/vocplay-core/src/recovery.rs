//! Playback recovery state machine
//!
//! ```text
//!  Idle ──error──▶ Restarting ──backoff elapsed──▶ WaitingForMedia ──probe ok──▶ play()
//!   ▲                  │                               │    ▲                       │
//!   │                  │                               └────┘ probe failed          │
//!   └──── play event ──┴───────────────────────────────────────────────────────────┘
//!   any ──reset()──▶ Idle
//! ```
//!
//! The machine never sleeps or does I/O itself. It mutates the player
//! directly and returns a [`RecoveryAction`] whenever a timer or probe is
//! needed; the supervisor runs those and feeds the outcome back through
//! [`RecoveryMachine::on_retry_elapsed`] and [`RecoveryMachine::on_probe_result`].
//! Every scheduled timer carries a token, outcomes with a stale token are
//! ignored, so a cancelled recovery cannot be resumed by a late timer.

use crate::{
    backoff::BackoffTimer,
    config::{ErrorClassifier, SupervisorConfig},
    player::Player,
    types::{ClearOverlay, ConfigurePatch, ErrorClass, PlaybackError, RecoveryPhase},
};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Identifies one scheduled retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryToken(u64);

/// Work the supervisor has to carry out for the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Call `on_retry_elapsed(token)` after `delay`, replacing any pending timer
    ScheduleRetry { token: RetryToken, delay: Duration },
    /// Probe `url` and report through `on_probe_result(token, ..)`
    Probe { token: RetryToken, url: Url },
    /// Drop the pending timer
    CancelRetry,
}

/// Outcome of an error notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorOutcome {
    pub class: ErrorClass,
    /// Overlay message for the user
    pub message: &'static str,
    /// False when the error was folded into a running recovery
    pub started_recovery: bool,
    pub action: Option<RecoveryAction>,
}

/// Active recovery attempt
#[derive(Debug)]
struct Recovery {
    phase: RecoveryPhase,
    token: RetryToken,
    clear_overlay: Option<ClearOverlay>,
}

/// Recovery state machine, one per supervised player
#[derive(Debug)]
pub struct RecoveryMachine {
    recovery: Option<Recovery>,
    backoff: BackoffTimer,
    classifier: ErrorClassifier,
    live_edge_offset: f64,
    next_token: u64,
}

impl RecoveryMachine {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            recovery: None,
            backoff: BackoffTimer::from_config(&config.backoff),
            classifier: config.error_codes.clone(),
            live_edge_offset: config.live_edge_offset_secs,
            next_token: 0,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffTimer) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.recovery
            .as_ref()
            .map_or(RecoveryPhase::Idle, |recovery| recovery.phase)
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery.is_some()
    }

    /// Token of the retry currently scheduled or probing
    pub fn pending_retry(&self) -> Option<RetryToken> {
        self.recovery.as_ref().map(|recovery| recovery.token)
    }

    pub fn backoff(&self) -> &BackoffTimer {
        &self.backoff
    }

    pub fn classify(&self, error: &PlaybackError) -> ErrorClass {
        self.classifier.classify(error)
    }

    fn issue_token(&mut self) -> RetryToken {
        self.next_token += 1;
        RetryToken(self.next_token)
    }

    /// Fatal playback error
    pub fn on_error(
        &mut self,
        player: &mut dyn Player,
        error: &PlaybackError,
        clear_overlay: Option<ClearOverlay>,
    ) -> ErrorOutcome {
        let class = self.classify(error);

        if let Some(recovery) = &mut self.recovery {
            debug!(error = %error, phase = %recovery.phase, "Error during recovery, ignored");
            if recovery.clear_overlay.is_none() {
                recovery.clear_overlay = clear_overlay;
            }
            return ErrorOutcome {
                class,
                message: class.message(),
                started_recovery: false,
                action: None,
            };
        }

        player.stop();

        let delay = self.backoff.next_delay();
        let token = self.issue_token();
        self.recovery = Some(Recovery {
            phase: RecoveryPhase::Restarting,
            token,
            clear_overlay,
        });

        info!(
            error = %error,
            class = ?class,
            retry_in_ms = delay.as_millis() as u64,
            "Playback error, recovery scheduled"
        );

        ErrorOutcome {
            class,
            message: class.message(),
            started_recovery: true,
            action: Some(RecoveryAction::ScheduleRetry { token, delay }),
        }
    }

    /// Backoff delay elapsed, check whether the media is back
    pub fn on_retry_elapsed(
        &mut self,
        player: &mut dyn Player,
        token: RetryToken,
    ) -> Option<RecoveryAction> {
        match &mut self.recovery {
            Some(recovery) if recovery.token == token => {
                recovery.phase = RecoveryPhase::WaitingForMedia;
            }
            _ => {
                debug!(?token, "Stale retry timer ignored");
                return None;
            }
        }

        match player.source().and_then(|source| source.resolve()) {
            Some(url) => {
                debug!(url = %url, "Waiting for media");
                Some(RecoveryAction::Probe { token, url })
            }
            None => {
                warn!("No resolvable source URL, escalating to hard reset");
                self.reset(player);
                None
            }
        }
    }

    /// Outcome of the reachability probe
    pub fn on_probe_result(
        &mut self,
        player: &mut dyn Player,
        token: RetryToken,
        reachable: bool,
    ) -> Option<RecoveryAction> {
        if self.pending_retry() != Some(token) {
            debug!(?token, "Stale probe result ignored");
            return None;
        }

        if reachable {
            info!("Media available again, resuming playback");
            player.play();
            return None;
        }

        let delay = self.backoff.next_delay();
        let token = self.issue_token();
        if let Some(recovery) = &mut self.recovery {
            recovery.token = token;
        }
        info!(retry_in_ms = delay.as_millis() as u64, "Media not reachable, retrying");
        Some(RecoveryAction::ScheduleRetry { token, delay })
    }

    /// Playback started; if recovering this is the soft-recovery success
    ///
    /// Returns true when a recovery was completed.
    pub fn on_play(&mut self) -> (bool, Option<RecoveryAction>) {
        self.backoff.reset();

        match self.recovery.take() {
            Some(recovery) => {
                info!(phase = %recovery.phase, "Soft recovery: playing again");
                if let Some(clear_overlay) = recovery.clear_overlay {
                    clear_overlay.call();
                }
                (true, Some(RecoveryAction::CancelRetry))
            }
            None => (false, None),
        }
    }

    /// Some playback engines stop themselves on error and need a nudge
    pub fn on_stop(&mut self, player: &mut dyn Player) {
        if !self.is_recovering() {
            return;
        }
        match player.active_playback() {
            Some(playback) => {
                debug!("Soft recovery: replaying stopped playback");
                playback.play();
            }
            None => debug!("Soft recovery: no active container to replay"),
        }
    }

    /// Buffer refilled; rejoin the live edge when recovering a live stream
    pub fn on_buffer_full(&mut self, player: &mut dyn Player) {
        if !self.is_recovering() || !player.content_kind().is_live() {
            return;
        }
        let position = (player.duration() - self.live_edge_offset).max(0.0);
        info!(position, "Seeking to live edge after recovery");
        player.seek(position);
    }

    /// Hard reset: reinitialize the player with its current source
    ///
    /// Safe to call in any phase. Audio is muted around the reconfiguration
    /// to avoid an audible glitch.
    pub fn reset(&mut self, player: &mut dyn Player) -> Option<RecoveryAction> {
        info!("Performing hard reset");
        let recovery = self.recovery.take();
        let was_recovering = recovery.is_some();
        if let Some(clear_overlay) = recovery.and_then(|r| r.clear_overlay) {
            clear_overlay.call();
        }

        let muted = player.volume() == 0.0;
        if !muted {
            player.mute();
        }

        let source = player.source();
        player.configure(ConfigurePatch {
            source,
            auto_play: Some(true),
        });

        if !muted {
            player.unmute();
        }

        was_recovering.then_some(RecoveryAction::CancelRetry)
    }
}
