//! Core types for vocplay

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Unique identifier for a supervised player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Playback type of the content currently loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Continuously growing live stream
    Live,
    /// Recorded content with a fixed duration
    OnDemand,
}

impl ContentKind {
    pub fn is_live(&self) -> bool {
        matches!(self, ContentKind::Live)
    }
}

/// Media source as configured on the player
///
/// Players accept either a bare URL or a structured object carrying the URL
/// next to a mime type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Source {
    Url(String),
    Structured {
        source: Option<String>,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl Source {
    /// Plain URL string, unwrapping structured sources
    pub fn as_url_str(&self) -> Option<&str> {
        match self {
            Source::Url(url) => Some(url.as_str()),
            Source::Structured { source, .. } => source.as_deref(),
        }
    }

    /// Resolve to an absolute http(s) URL
    ///
    /// Protocol-relative CDN URLs (`//cdn.example/...`) resolve to https.
    pub fn resolve(&self) -> Option<Url> {
        let raw = self.as_url_str()?.trim();
        if raw.is_empty() {
            return None;
        }

        let url = if raw.starts_with("//") {
            Url::parse(&format!("https:{raw}")).ok()?
        } else {
            Url::parse(raw).ok()?
        };

        match url.scheme() {
            "http" | "https" => Some(url),
            _ => None,
        }
    }
}

impl From<&str> for Source {
    fn from(url: &str) -> Self {
        Source::Url(url.to_string())
    }
}

/// Partial player options applied through `Player::configure`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_play: Option<bool>,
}

/// Error raised by the underlying playback engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackError {
    /// Engine or plugin the error originates from (e.g. `hls`, `dash_shaka`)
    pub origin: String,
    /// Raw engine-specific error code
    pub code: i64,
    /// Engine supplied description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PlaybackError {
    pub fn new(origin: impl Into<String>, code: i64) -> Self {
        Self {
            origin: origin.into(),
            code,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(desc) => write!(f, "{} error {}: {}", self.origin, self.code, desc),
            None => write!(f, "{} error {}", self.origin, self.code),
        }
    }
}

/// User-facing classification of a playback error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    StreamOffline,
    NetworkError,
    UnknownError,
}

impl ErrorClass {
    /// Message shown on the error overlay
    pub fn message(&self) -> &'static str {
        match self {
            ErrorClass::StreamOffline => "Stream is offline",
            ErrorClass::NetworkError => "A network error occurred",
            ErrorClass::UnknownError => "Oh no, an unknown error occurred",
        }
    }
}

/// Callback removing the error overlay once playback recovered
pub struct ClearOverlay(Box<dyn FnOnce() + Send>);

impl ClearOverlay {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn call(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for ClearOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClearOverlay")
    }
}

/// Notifications emitted by the supervised player
#[derive(Debug)]
pub enum PlayerEvent {
    /// Playback started or resumed
    Play,
    /// Playback stopped
    Stop,
    /// Explicit seek requested
    Seek { position: f64 },
    /// Fatal playback error
    Error {
        error: PlaybackError,
        clear_overlay: Option<ClearOverlay>,
    },
    /// Buffer filled, playback can continue
    BufferFull,
    /// Playback stalled waiting for data
    BufferingStart,
    /// Adaptive bitrate engine switched level
    BitrateChanged { bitrate: Option<f64> },
    /// The player attached a different active container
    ContainerChanged,
}

impl PlayerEvent {
    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::Play => "play",
            PlayerEvent::Stop => "stop",
            PlayerEvent::Seek { .. } => "seek",
            PlayerEvent::Error { .. } => "error",
            PlayerEvent::BufferFull => "buffer-full",
            PlayerEvent::BufferingStart => "buffering-start",
            PlayerEvent::BitrateChanged { .. } => "bitrate-changed",
            PlayerEvent::ContainerChanged => "container-changed",
        }
    }
}

/// Recovery state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    /// Playing normally, no recovery in progress
    Idle,
    /// Player stopped, waiting for the backoff delay
    Restarting,
    /// Probing the source until media is reachable again
    WaitingForMedia,
}

impl RecoveryPhase {
    pub fn is_recovering(&self) -> bool {
        !matches!(self, RecoveryPhase::Idle)
    }
}

impl std::fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryPhase::Idle => write!(f, "idle"),
            RecoveryPhase::Restarting => write!(f, "restarting"),
            RecoveryPhase::WaitingForMedia => write!(f, "waiting_for_media"),
        }
    }
}

/// Snapshot published by the supervisor on every phase change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub phase: RecoveryPhase,
    /// Overlay message while an error is displayed
    pub message: Option<&'static str>,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            phase: RecoveryPhase::Idle,
            message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_resolves_protocol_relative() {
        let source = Source::from("//cdn.c3voc.de/hls/s1/native_hd.m3u8");
        let url = source.resolve().unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("cdn.c3voc.de"));
    }

    #[test]
    fn test_structured_source_unwraps() {
        let source: Source = serde_json::from_str(
            r#"{"source": "https://cdn.c3voc.de/s1_native.mp3", "mimeType": "audio/mp3"}"#,
        )
        .unwrap();
        assert_eq!(source.as_url_str(), Some("https://cdn.c3voc.de/s1_native.mp3"));
        assert!(source.resolve().is_some());
    }

    #[test]
    fn test_unresolvable_sources() {
        assert!(Source::Structured { source: None, mime_type: None }.resolve().is_none());
        assert!(Source::from("").resolve().is_none());
        assert!(Source::from("not a url").resolve().is_none());
        assert!(Source::from("file:///tmp/video.webm").resolve().is_none());
    }

    #[test]
    fn test_error_class_messages() {
        assert_eq!(ErrorClass::StreamOffline.message(), "Stream is offline");
        assert_eq!(ErrorClass::NetworkError.message(), "A network error occurred");
        assert_eq!(ErrorClass::UnknownError.message(), "Oh no, an unknown error occurred");
    }

    #[test]
    fn test_configure_patch_serializes_camel_case() {
        let patch = ConfigurePatch {
            source: Some(Source::from("https://cdn.example/a.m3u8")),
            auto_play: Some(true),
        };
        let json = serde_json::to_string(&patch).unwrap();
        assert!(json.contains("\"autoPlay\":true"));
    }
}
