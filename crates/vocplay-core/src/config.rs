//! Supervisor and player configuration
//!
//! `SupervisorConfig` holds the tunables of the recovery and telemetry
//! machinery and can be loaded from a JSON file where missing fields fall
//! back to their defaults. `PlayerOptions` is the player-facing surface,
//! usually decoded from the query string of an embed URL.

use crate::{
    types::{ErrorClass, PlaybackError},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Retry pacing for recovery attempts
    pub backoff: BackoffConfig,
    /// Timeout for a single media reachability probe (seconds)
    pub probe_timeout_secs: f64,
    /// Distance kept from the live edge when rejoining a live stream (seconds)
    pub live_edge_offset_secs: f64,
    /// Buffering this soon after a seek is not reported (seconds)
    pub seek_grace_secs: f64,
    /// Telemetry batching and delivery
    pub telemetry: TelemetryConfig,
    /// Mapping of engine error codes to overlay messages
    pub error_codes: ErrorClassifier,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            probe_timeout_secs: 3.0,
            live_edge_offset_secs: 6.0,
            seek_grace_secs: 1.0,
            telemetry: TelemetryConfig::default(),
            error_codes: ErrorClassifier::default(),
        }
    }
}

impl SupervisorConfig {
    /// Parse from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SupervisorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject values the supervisor cannot work with
    pub fn validate(&self) -> Result<()> {
        self.backoff.validate()?;
        self.telemetry.validate()?;

        check_secs("probe_timeout_secs", self.probe_timeout_secs, false)?;
        check_secs("live_edge_offset_secs", self.live_edge_offset_secs, true)?;
        check_secs("seek_grace_secs", self.seek_grace_secs, true)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.probe_timeout_secs)
    }

    pub fn seek_grace(&self) -> Duration {
        Duration::from_secs_f64(self.seek_grace_secs)
    }
}

/// Longest duration any setting may hold (one day)
pub const MAX_SECS: f64 = 86_400.0;

/// Durations must be finite, within `MAX_SECS` and positive unless `allow_zero`
fn check_secs(name: &str, value: f64, allow_zero: bool) -> Result<()> {
    let lower_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if lower_ok && value <= MAX_SECS {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "{name} must be {} and at most {MAX_SECS} seconds, got {value}",
            if allow_zero { "non-negative" } else { "positive" }
        )))
    }
}

/// Recovery backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First retry timeout (seconds)
    pub initial_timeout_secs: f64,
    /// Upper bound for the retry timeout (seconds)
    pub max_timeout_secs: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_timeout_secs: 5.0,
            max_timeout_secs: 15.0,
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<()> {
        check_secs("backoff.initial_timeout_secs", self.initial_timeout_secs, false)?;
        check_secs("backoff.max_timeout_secs", self.max_timeout_secs, false)?;
        if self.max_timeout_secs < self.initial_timeout_secs {
            return Err(Error::InvalidConfig(
                "backoff.max_timeout_secs must be at least initial_timeout_secs".into(),
            ));
        }
        Ok(())
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Collector endpoint, events are only logged when unset
    pub endpoint: Option<Url>,
    /// Upper bound of the random delay used to coalesce events (seconds)
    pub flush_window_secs: f64,
    /// First delivery retry delay (seconds)
    pub retry_initial_secs: f64,
    /// Upper bound for the delivery retry delay (seconds)
    pub retry_max_secs: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            flush_window_secs: 5.0,
            retry_initial_secs: 3.0,
            retry_max_secs: 300.0,
        }
    }
}

impl TelemetryConfig {
    fn validate(&self) -> Result<()> {
        check_secs("telemetry.flush_window_secs", self.flush_window_secs, true)?;
        check_secs("telemetry.retry_initial_secs", self.retry_initial_secs, false)?;
        check_secs("telemetry.retry_max_secs", self.retry_max_secs, false)?;
        if self.retry_max_secs < self.retry_initial_secs {
            return Err(Error::InvalidConfig(
                "telemetry.retry_max_secs must be at least retry_initial_secs".into(),
            ));
        }
        Ok(())
    }

    pub fn flush_window(&self) -> Duration {
        Duration::from_secs_f64(self.flush_window_secs)
    }
}

/// A single error code mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCodeRule {
    /// Engine the code belongs to, `None` matches any engine
    #[serde(default)]
    pub origin: Option<String>,
    pub code: i64,
    pub class: ErrorClass,
}

impl ErrorCodeRule {
    pub fn new(origin: Option<&str>, code: i64, class: ErrorClass) -> Self {
        Self {
            origin: origin.map(str::to_string),
            code,
            class,
        }
    }

    fn matches(&self, error: &PlaybackError) -> bool {
        self.code == error.code
            && self
                .origin
                .as_deref()
                .map_or(true, |origin| origin.eq_ignore_ascii_case(&error.origin))
    }
}

/// Engine-agnostic classification of playback errors
///
/// Rules are checked in order, the first match wins. Unmatched errors are
/// `ErrorClass::UnknownError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorClassifier {
    rules: Vec<ErrorCodeRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(vec![
            // Shaka: BAD_HTTP_STATUS / HTTP_ERROR
            ErrorCodeRule::new(Some("dash_shaka"), 1001, ErrorClass::StreamOffline),
            ErrorCodeRule::new(Some("dash_shaka"), 1002, ErrorClass::NetworkError),
            // hls.js / native: HTTP status, 0 when the request never completed
            ErrorCodeRule::new(Some("hls"), 404, ErrorClass::StreamOffline),
            ErrorCodeRule::new(Some("hls"), 0, ErrorClass::NetworkError),
        ])
    }
}

impl ErrorClassifier {
    pub fn new(rules: Vec<ErrorCodeRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ErrorCodeRule] {
        &self.rules
    }

    pub fn classify(&self, error: &PlaybackError) -> ErrorClass {
        self.rules
            .iter()
            .find(|rule| rule.matches(error))
            .map(|rule| rule.class)
            .unwrap_or(ErrorClass::UnknownError)
    }
}

/// What a user supplied error handler did with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// The handler took care of the error, skip built-in recovery
    Handled,
    /// Continue with built-in recovery
    Unhandled,
}

/// User supplied error handler override
#[derive(Clone)]
pub struct ErrorHandler(Arc<dyn Fn(&PlaybackError, ErrorClass) -> ErrorDisposition + Send + Sync>);

impl ErrorHandler {
    pub fn new(
        f: impl Fn(&PlaybackError, ErrorClass) -> ErrorDisposition + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    pub fn handle(&self, error: &PlaybackError, class: ErrorClass) -> ErrorDisposition {
        (self.0)(error, class)
    }
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ErrorHandler")
    }
}

/// Player-facing options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerOptions {
    /// Stream identifier driving source selection
    pub voc_stream: Option<String>,
    /// Prefer audio-only sources
    pub audio_only: bool,
    /// Restrict video sources to H.264
    pub h264_only: bool,
    /// Preferred audio track language (ISO 639)
    pub preferred_audio_language: Option<String>,
    /// Poster image shown before playback
    pub poster: Option<String>,
    /// Replaces built-in error handling when set
    #[serde(skip)]
    pub error_handler: Option<ErrorHandler>,
}

impl PlayerOptions {
    pub fn for_stream(stream: impl Into<String>) -> Self {
        Self {
            voc_stream: Some(stream.into()),
            ..Default::default()
        }
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Decode options from an embed URL or its query string
    ///
    /// Repeated keys keep the last value. Unknown keys are ignored.
    pub fn from_query(input: &str) -> Self {
        let query = match input.split_once('?') {
            Some((_, query)) => query,
            None => input,
        };
        let query = query.split('#').next().unwrap_or_default();

        let mut options = PlayerOptions::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim();
            match key.as_ref() {
                "stream" | "vocStream" => options.voc_stream = non_empty(value),
                "audio_only" | "audioOnly" => options.audio_only = parse_flag(value),
                "h264_only" | "h264Only" => options.h264_only = parse_flag(value),
                "lang" | "preferredAudioLanguage" => {
                    options.preferred_audio_language = non_empty(value)
                }
                "poster" => options.poster = non_empty(value),
                _ => {}
            }
        }
        options
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "" | "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.backoff.initial_timeout_secs, 5.0);
        assert_eq!(config.backoff.max_timeout_secs, 15.0);
        assert_eq!(config.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.live_edge_offset_secs, 6.0);
        assert_eq!(config.seek_grace(), Duration::from_secs(1));
        assert_eq!(config.telemetry.retry_initial_secs, 3.0);
        assert!(config.telemetry.endpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = SupervisorConfig::from_json_str(
            r#"{"backoff": {"max_timeout_secs": 30}, "telemetry": {"endpoint": "https://stats.example/collect"}}"#,
        )
        .unwrap();
        assert_eq!(config.backoff.initial_timeout_secs, 5.0);
        assert_eq!(config.backoff.max_timeout_secs, 30.0);
        assert_eq!(
            config.telemetry.endpoint.as_ref().map(|u| u.as_str()),
            Some("https://stats.example/collect")
        );
        assert_eq!(config.error_codes, ErrorClassifier::default());
    }

    #[test]
    fn test_invalid_backoff_rejected() {
        let err = SupervisorConfig::from_json_str(
            r#"{"backoff": {"initial_timeout_secs": 10, "max_timeout_secs": 5}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        for json in [
            r#"{"probe_timeout_secs": 1e300}"#,
            r#"{"seek_grace_secs": 1e300}"#,
            r#"{"backoff": {"max_timeout_secs": 1e300}}"#,
            r#"{"telemetry": {"retry_max_secs": 1e300}}"#,
            r#"{"telemetry": {"flush_window_secs": -1}}"#,
        ] {
            let err = SupervisorConfig::from_json_str(json).unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "{json}");
        }

        let config = SupervisorConfig::from_json_str(r#"{"probe_timeout_secs": 86400}"#).unwrap();
        assert_eq!(config.probe_timeout(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_classifier_default_rules() {
        let classifier = ErrorClassifier::default();
        assert_eq!(
            classifier.classify(&PlaybackError::new("dash_shaka", 1001)),
            ErrorClass::StreamOffline
        );
        assert_eq!(
            classifier.classify(&PlaybackError::new("dash_shaka", 1002)),
            ErrorClass::NetworkError
        );
        assert_eq!(
            classifier.classify(&PlaybackError::new("hls", 404)),
            ErrorClass::StreamOffline
        );
        assert_eq!(
            classifier.classify(&PlaybackError::new("hls", 0)),
            ErrorClass::NetworkError
        );
        // Codes are engine specific
        assert_eq!(
            classifier.classify(&PlaybackError::new("dash_shaka", 404)),
            ErrorClass::UnknownError
        );
    }

    #[test]
    fn test_classifier_wildcard_origin() {
        let classifier = ErrorClassifier::new(vec![
            ErrorCodeRule::new(Some("html5"), 4, ErrorClass::NetworkError),
            ErrorCodeRule::new(None, 4, ErrorClass::StreamOffline),
        ]);
        assert_eq!(
            classifier.classify(&PlaybackError::new("HTML5", 4)),
            ErrorClass::NetworkError
        );
        assert_eq!(
            classifier.classify(&PlaybackError::new("hls", 4)),
            ErrorClass::StreamOffline
        );
    }

    #[test]
    fn test_classifier_from_json() {
        let classifier: ErrorClassifier =
            serde_json::from_str(r#"[{"code": 503, "class": "network_error"}]"#).unwrap();
        assert_eq!(
            classifier.classify(&PlaybackError::new("anything", 503)),
            ErrorClass::NetworkError
        );
    }

    #[test]
    fn test_options_from_embed_url() {
        let options = PlayerOptions::from_query(
            "https://streaming.media.ccc.de/embed.html?stream=s1&audio_only=1&lang=deu&poster=%2F%2Fcdn%2Fp.jpeg",
        );
        assert_eq!(options.voc_stream.as_deref(), Some("s1"));
        assert!(options.audio_only);
        assert!(!options.h264_only);
        assert_eq!(options.preferred_audio_language.as_deref(), Some("deu"));
        assert_eq!(options.poster.as_deref(), Some("//cdn/p.jpeg"));
    }

    #[test]
    fn test_options_last_value_wins() {
        let options = PlayerOptions::from_query("stream=s1&stream=s2&h264Only=false&h264Only");
        assert_eq!(options.voc_stream.as_deref(), Some("s2"));
        assert!(options.h264_only);
    }

    #[test]
    fn test_options_empty_query() {
        let options = PlayerOptions::from_query("");
        assert!(options.voc_stream.is_none());
        assert!(!options.audio_only);
    }
}
