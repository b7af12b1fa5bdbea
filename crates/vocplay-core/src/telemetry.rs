//! Playback telemetry batching and delivery
//!
//! Events are queued by a dedicated task, coalesced for a random delay of
//! up to `flush_window` and delivered as one JSON batch. A failed delivery
//! keeps the queue intact and retries with jittered exponential backoff, so
//! events recorded in the meantime ride along with the next attempt.
//!
//! Timestamps are sent as offsets relative to the moment of delivery, which
//! keeps the collector independent of client clock skew.

use crate::{backoff::BackoffTimer, config::TelemetryConfig, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Playback quality event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Fatal playback error
    Error,
    /// Playback resumed after an error
    Recovery,
    /// Playback stalled
    Buffering,
    /// Adaptive bitrate switch
    QualitySwitch {
        #[serde(rename = "isUp")]
        is_up: bool,
    },
}

impl TelemetryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryEvent::Error => "error",
            TelemetryEvent::Recovery => "recovery",
            TelemetryEvent::Buffering => "buffering",
            TelemetryEvent::QualitySwitch { .. } => "quality_switch",
        }
    }
}

/// Context attached to every recorded event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryContext {
    /// Stream identifier
    pub slug: Option<String>,
    /// Host of the relay serving the media
    pub relay: Option<String>,
}

/// Wire format of a delivered event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    #[serde(flatten)]
    pub event: TelemetryEvent,
    /// Seconds between recording and delivery
    pub offset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
}

/// Event waiting for delivery
#[derive(Debug, Clone)]
struct QueuedEvent {
    event: TelemetryEvent,
    at: Instant,
    recorded_at: DateTime<Utc>,
    slug: Option<String>,
    relay: Option<String>,
}

impl QueuedEvent {
    fn to_record(&self, now: Instant) -> TelemetryRecord {
        TelemetryRecord {
            event: self.event,
            offset: now.saturating_duration_since(self.at).as_secs_f64(),
            slug: self.slug.clone(),
            relay: self.relay.clone(),
        }
    }
}

/// Destination of telemetry batches
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn deliver(&self, batch: &[TelemetryRecord]) -> Result<()>;
}

/// POSTs batches as a JSON array to a collector endpoint
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: Url,
}

impl HttpSink {
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    #[instrument(skip(self, batch), fields(endpoint = %self.endpoint, count = batch.len()))]
    async fn deliver(&self, batch: &[TelemetryRecord]) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(batch)
            .send()
            .await
            .map_err(|e| Error::delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::DeliveryStatus {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Logs batches instead of sending them, used when no endpoint is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn deliver(&self, batch: &[TelemetryRecord]) -> Result<()> {
        for record in batch {
            info!(
                kind = record.event.kind(),
                offset = record.offset,
                slug = record.slug.as_deref(),
                relay = record.relay.as_deref(),
                "Telemetry event"
            );
        }
        Ok(())
    }
}

enum Command {
    /// Event with the moment it was recorded
    Record(TelemetryEvent, Instant, DateTime<Utc>),
    SetContext(TelemetryContext),
}

/// Sending side of a running batcher
#[derive(Debug, Clone)]
pub struct TelemetryHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Record(event, ..) => write!(f, "Record({})", event.kind()),
            Command::SetContext(_) => f.write_str("SetContext"),
        }
    }
}

impl TelemetryHandle {
    /// Queue an event for delivery
    pub fn record(&self, event: TelemetryEvent) {
        if self
            .tx
            .send(Command::Record(event, Instant::now(), Utc::now()))
            .is_err()
        {
            debug!(kind = event.kind(), "Telemetry batcher stopped, event dropped");
        }
    }

    /// Replace the context attached to subsequently recorded events
    pub fn set_context(&self, context: TelemetryContext) {
        let _ = self.tx.send(Command::SetContext(context));
    }

    /// A handle whose events go nowhere
    pub fn disconnected() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// Queue owner, runs as its own task
pub struct TelemetryBatcher {
    sink: Arc<dyn TelemetrySink>,
    queue: Vec<QueuedEvent>,
    context: TelemetryContext,
    /// Deadline of the pending flush, at most one at a time
    flush_at: Option<Instant>,
    flush_window: Duration,
    retry: BackoffTimer,
    rng: fastrand::Rng,
}

impl TelemetryBatcher {
    pub fn new(config: &TelemetryConfig, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            sink,
            queue: Vec::new(),
            context: TelemetryContext::default(),
            flush_at: None,
            flush_window: config.flush_window(),
            retry: BackoffTimer::for_delivery(
                Duration::from_secs_f64(config.retry_initial_secs),
                Duration::from_secs_f64(config.retry_max_secs),
            ),
            rng: fastrand::Rng::new(),
        }
    }

    /// Sink for a config: HTTP when an endpoint is set, logging otherwise
    pub fn sink_for(config: &TelemetryConfig) -> Result<Arc<dyn TelemetrySink>> {
        Ok(match &config.endpoint {
            Some(endpoint) => Arc::new(HttpSink::new(endpoint.clone())?),
            None => Arc::new(LogSink),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self.retry = self.retry.with_seed(seed);
        self
    }

    /// Start the batcher task
    ///
    /// The task ends once every handle is dropped, after one last delivery
    /// attempt. It resolves to the number of events that attempt could not
    /// deliver; those are lost.
    pub fn spawn(self) -> (TelemetryHandle, JoinHandle<usize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (TelemetryHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) -> usize {
        loop {
            let deadline = self.flush_at;
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Record(event, at, recorded_at)) => {
                        self.append(event, at, recorded_at)
                    }
                    Some(Command::SetContext(context)) => self.context = context,
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush().await;
                }
            }
        }

        if !self.queue.is_empty() {
            debug!(count = self.queue.len(), "Final telemetry flush");
            self.flush().await;
        }

        let lost = self.queue.len();
        if lost > 0 {
            warn!(lost, "Telemetry events dropped at shutdown");
        }
        lost
    }

    fn append(&mut self, event: TelemetryEvent, at: Instant, recorded_at: DateTime<Utc>) {
        self.queue.push(QueuedEvent {
            event,
            at,
            recorded_at,
            slug: self.context.slug.clone(),
            relay: self.context.relay.clone(),
        });
        self.schedule_flush();
    }

    fn schedule_flush(&mut self) {
        if self.flush_at.is_some() {
            return;
        }
        let delay = self.flush_window.mul_f64(self.rng.f64());
        self.flush_at = Some(Instant::now() + delay);
    }

    async fn flush(&mut self) {
        if self.queue.is_empty() {
            self.flush_at = None;
            return;
        }

        let now = Instant::now();
        let batch: Vec<TelemetryRecord> = self.queue.iter().map(|e| e.to_record(now)).collect();
        let count = batch.len();

        match self.sink.deliver(&batch).await {
            Ok(()) => {
                debug!(
                    count,
                    oldest = %self.queue[0].recorded_at,
                    "Telemetry batch delivered"
                );
                self.queue.drain(..count);
                self.retry.reset();
                self.flush_at = None;
                if !self.queue.is_empty() {
                    self.schedule_flush();
                }
            }
            Err(e) => {
                let delay = self.retry.next_delay();
                warn!(
                    error = %e,
                    count,
                    retry_in_ms = delay.as_millis() as u64,
                    "Telemetry delivery failed"
                );
                self.flush_at = Some(Instant::now() + delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` deliveries, then records batches
    #[derive(Default)]
    struct RecordingSink {
        failures: AtomicUsize,
        attempts: AtomicUsize,
        batches: Mutex<Vec<Vec<TelemetryRecord>>>,
    }

    impl RecordingSink {
        fn failing(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                ..Default::default()
            }
        }

        fn batches(&self) -> Vec<Vec<TelemetryRecord>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TelemetrySink for RecordingSink {
        async fn deliver(&self, batch: &[TelemetryRecord]) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::delivery("collector unavailable"));
            }
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    fn spawn_with(sink: Arc<RecordingSink>) -> TelemetryHandle {
        let (handle, _task) = TelemetryBatcher::new(&TelemetryConfig::default(), sink)
            .with_seed(42)
            .spawn();
        handle
    }

    async fn settle(duration: Duration) {
        tokio::time::sleep(duration).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_record_wire_format() {
        let record = TelemetryRecord {
            event: TelemetryEvent::QualitySwitch { is_up: false },
            offset: 1.5,
            slug: Some("s1".into()),
            relay: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "quality_switch", "isUp": false, "offset": 1.5, "slug": "s1"})
        );

        let record = TelemetryRecord {
            event: TelemetryEvent::Buffering,
            offset: 0.0,
            slug: None,
            relay: Some("relay1.example".into()),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "buffering", "offset": 0.0, "relay": "relay1.example"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced_into_one_batch() {
        let sink = Arc::new(RecordingSink::default());
        let handle = spawn_with(sink.clone());

        handle.record(TelemetryEvent::Error);
        handle.record(TelemetryEvent::Buffering);
        handle.record(TelemetryEvent::QualitySwitch { is_up: true });

        settle(Duration::from_secs(6)).await;

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        let kinds: Vec<_> = batches[0].iter().map(|r| r.event.kind()).collect();
        assert_eq!(kinds, vec!["error", "buffering", "quality_switch"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_after_flush_go_to_next_batch() {
        let sink = Arc::new(RecordingSink::default());
        let handle = spawn_with(sink.clone());

        handle.record(TelemetryEvent::Error);
        settle(Duration::from_secs(6)).await;
        handle.record(TelemetryEvent::Recovery);
        settle(Duration::from_secs(6)).await;

        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].event, TelemetryEvent::Error);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1][0].event, TelemetryEvent::Recovery);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_deliveries_keep_events() {
        let sink = Arc::new(RecordingSink::failing(2));
        let config = TelemetryConfig {
            flush_window_secs: 1.0,
            retry_initial_secs: 10.0,
            ..Default::default()
        };
        let (handle, _task) = TelemetryBatcher::new(&config, sink.clone())
            .with_seed(3)
            .spawn();

        handle.record(TelemetryEvent::Error);
        settle(Duration::from_secs(2)).await;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);

        // Joins the retry of the failed batch
        handle.record(TelemetryEvent::Buffering);
        settle(Duration::from_secs(120)).await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        let kinds: Vec<_> = batches[0].iter().map(|r| r.event.kind()).collect();
        assert_eq!(kinds, vec!["error", "buffering"]);
        // Offsets are relative to the delivery time
        assert!(batches[0][0].offset > batches[0][1].offset);
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_is_stamped_at_record_time() {
        let sink = Arc::new(RecordingSink::default());
        let handle = spawn_with(sink.clone());

        handle.record(TelemetryEvent::Error);
        handle.set_context(TelemetryContext {
            slug: Some("s2".into()),
            relay: Some("relay.example".into()),
        });
        handle.record(TelemetryEvent::Recovery);

        settle(Duration::from_secs(6)).await;

        let batch = &sink.batches()[0];
        assert_eq!(batch[0].slug, None);
        assert_eq!(batch[1].slug.as_deref(), Some("s2"));
        assert_eq!(batch[1].relay.as_deref(), Some("relay.example"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_events_flushed_on_shutdown() {
        let sink = Arc::new(RecordingSink::default());
        let (handle, task) = TelemetryBatcher::new(&TelemetryConfig::default(), sink.clone())
            .with_seed(1)
            .spawn();

        handle.record(TelemetryEvent::Buffering);
        drop(handle);
        assert_eq!(task.await.unwrap(), 0);

        assert_eq!(sink.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_final_flush_reports_lost_events() {
        let sink = Arc::new(RecordingSink::failing(5));
        let (handle, task) = TelemetryBatcher::new(&TelemetryConfig::default(), sink.clone())
            .with_seed(1)
            .spawn();

        handle.record(TelemetryEvent::Error);
        handle.record(TelemetryEvent::Buffering);
        drop(handle);

        assert_eq!(task.await.unwrap(), 2);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
        assert!(sink.batches().is_empty());
    }

    /// Takes `delay` to answer the first delivery
    struct SlowSink {
        delay: Duration,
        calls: AtomicUsize,
        batches: Mutex<Vec<Vec<TelemetryRecord>>>,
    }

    #[async_trait]
    impl TelemetrySink for SlowSink {
        async fn deliver(&self, batch: &[TelemetryRecord]) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(self.delay).await;
            }
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offset_counts_from_record_during_slow_delivery() {
        let sink = Arc::new(SlowSink {
            delay: Duration::from_secs(8),
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        });
        let config = TelemetryConfig {
            flush_window_secs: 0.0,
            ..Default::default()
        };
        let (handle, _task) = TelemetryBatcher::new(&config, sink.clone())
            .with_seed(9)
            .spawn();

        handle.record(TelemetryEvent::Error);
        settle(Duration::from_millis(100)).await;
        // First delivery still in flight
        handle.record(TelemetryEvent::Buffering);
        settle(Duration::from_secs(10)).await;

        let batches = sink.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].event, TelemetryEvent::Error);
        assert_eq!(batches[1][0].event, TelemetryEvent::Buffering);
        let offset = batches[1][0].offset;
        assert!((7.8..=8.0).contains(&offset), "offset {offset}");
    }
}
