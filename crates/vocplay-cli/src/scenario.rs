//! Scripted scenarios for the `simulate` command

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use vocplay_core::{
    ClearOverlay, ConfigurePatch, ContentKind, Playback, PlaybackError, Player, PlayerEvent,
    PlayerOptions, Source,
};

/// A player setup and the events it emits over time
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Source configured on the player
    pub source: Option<String>,
    #[serde(default = "default_content")]
    pub content: ContentKind,
    /// Player options, same keys as the embed query
    #[serde(default)]
    pub options: PlayerOptions,
    /// Reported duration in seconds
    #[serde(default = "default_duration")]
    pub duration: f64,
    /// Time to keep running after the last step
    #[serde(default)]
    pub settle_secs: f64,
    pub steps: Vec<Step>,
}

fn default_content() -> ContentKind {
    ContentKind::Live
}

fn default_duration() -> f64 {
    3600.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    /// Delay before this step, relative to the previous one
    #[serde(default)]
    pub after_ms: u64,
    #[serde(flatten)]
    pub event: ScriptedEvent,
}

impl Step {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.after_ms)
    }
}

/// Serializable form of a player notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptedEvent {
    Play,
    Stop,
    Seek {
        position: f64,
    },
    Error {
        origin: String,
        code: i64,
        #[serde(default)]
        description: Option<String>,
    },
    BufferFull,
    BufferingStart,
    BitrateChanged {
        bitrate: Option<f64>,
    },
    ContainerChanged,
}

impl ScriptedEvent {
    pub fn into_player_event(self) -> PlayerEvent {
        match self {
            ScriptedEvent::Play => PlayerEvent::Play,
            ScriptedEvent::Stop => PlayerEvent::Stop,
            ScriptedEvent::Seek { position } => PlayerEvent::Seek { position },
            ScriptedEvent::Error {
                origin,
                code,
                description,
            } => {
                let mut error = PlaybackError::new(origin, code);
                if let Some(description) = description {
                    error = error.with_description(description);
                }
                PlayerEvent::Error {
                    error,
                    clear_overlay: Some(ClearOverlay::new(|| info!("Overlay cleared"))),
                }
            }
            ScriptedEvent::BufferFull => PlayerEvent::BufferFull,
            ScriptedEvent::BufferingStart => PlayerEvent::BufferingStart,
            ScriptedEvent::BitrateChanged { bitrate } => PlayerEvent::BitrateChanged { bitrate },
            ScriptedEvent::ContainerChanged => PlayerEvent::ContainerChanged,
        }
    }
}

/// Summary of what the supervisor did to the player
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlayerReport {
    pub plays: usize,
    pub stops: usize,
    pub seeks: Vec<f64>,
    pub resets: usize,
    pub container_replays: usize,
}

#[derive(Debug, Default)]
struct ScriptedContainer {
    replays: usize,
}

impl Playback for ScriptedContainer {
    fn play(&mut self) {
        self.replays += 1;
        info!("player: container play");
    }
}

/// Player that only logs what it is asked to do
#[derive(Debug)]
pub struct ScriptedPlayer {
    source: Option<Source>,
    kind: ContentKind,
    duration: f64,
    volume: f64,
    muted_volume: Option<f64>,
    container: ScriptedContainer,
    report: PlayerReport,
}

impl ScriptedPlayer {
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            source: scenario.source.as_deref().map(Source::from),
            kind: scenario.content,
            duration: scenario.duration,
            volume: 1.0,
            muted_volume: None,
            container: ScriptedContainer::default(),
            report: PlayerReport::default(),
        }
    }

    pub fn report(&self) -> PlayerReport {
        PlayerReport {
            container_replays: self.container.replays,
            ..self.report.clone()
        }
    }
}

impl Player for ScriptedPlayer {
    fn play(&mut self) {
        self.report.plays += 1;
        info!("player: play");
    }

    fn stop(&mut self) {
        self.report.stops += 1;
        info!("player: stop");
    }

    fn seek(&mut self, position: f64) {
        self.report.seeks.push(position);
        info!(position, "player: seek");
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn mute(&mut self) {
        self.muted_volume = Some(self.volume);
        self.volume = 0.0;
        info!("player: mute");
    }

    fn unmute(&mut self) {
        self.volume = self.muted_volume.take().unwrap_or(1.0);
        info!("player: unmute");
    }

    fn configure(&mut self, patch: ConfigurePatch) {
        self.report.resets += 1;
        info!(
            source = patch.source.as_ref().and_then(Source::as_url_str),
            auto_play = patch.auto_play,
            "player: configure"
        );
        if patch.source.is_some() {
            self.source = patch.source;
        }
    }

    fn source(&self) -> Option<Source> {
        self.source.clone()
    }

    fn content_kind(&self) -> ContentKind {
        self.kind
    }

    fn active_playback(&mut self) -> Option<&mut dyn Playback> {
        Some(&mut self.container)
    }
}
