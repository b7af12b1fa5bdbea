//! The supervised player
//!
//! The supervisor does not render or decode anything itself. It drives a
//! third-party player through this trait and receives its notifications as
//! [`PlayerEvent`](crate::PlayerEvent)s.

use crate::types::{ConfigurePatch, ContentKind, Source};

/// Playback of the container currently attached to the player
pub trait Playback {
    fn play(&mut self);
}

/// Operations the supervisor needs from the wrapped player
pub trait Player: Send {
    fn play(&mut self);

    fn stop(&mut self);

    fn seek(&mut self, position: f64);

    /// Content duration in seconds (live: position of the live edge)
    fn duration(&self) -> f64;

    /// Volume in `[0, 1]`, zero when muted
    fn volume(&self) -> f64;

    fn mute(&mut self);

    fn unmute(&mut self);

    /// Apply partial options, a new source forces a full reinitialization
    fn configure(&mut self, patch: ConfigurePatch);

    /// Source the player is configured with
    fn source(&self) -> Option<Source>;

    fn content_kind(&self) -> ContentKind;

    /// Playback of the active container, `None` before the player is ready
    fn active_playback(&mut self) -> Option<&mut dyn Playback>;
}
