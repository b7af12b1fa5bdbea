//! Playback supervisor - owns the player and drives recovery
//!
//! Coordinates:
//! - Dispatch of player notifications to the recovery machine and observer
//! - Retry timers and reachability probes requested by the recovery machine
//! - Telemetry recording (live content only)
//! - Status publication and caller-initiated hard resets
//!
//! Everything runs on one task. Timers and probes are spawned separately but
//! only post their outcome back to the supervisor, so the player is never
//! touched concurrently.

use crate::{
    config::{ErrorDisposition, PlayerOptions, SupervisorConfig},
    observer::PlaybackObserver,
    player::Player,
    probe::{HttpProbe, MediaProbe},
    recovery::{RecoveryAction, RecoveryMachine, RetryToken},
    telemetry::{TelemetryBatcher, TelemetryContext, TelemetryEvent, TelemetryHandle},
    types::{PlayerEvent, RecoveryPhase, SessionId, SupervisorStatus},
    Error, Result,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Outcomes of work spawned by the supervisor
#[derive(Debug)]
enum Internal {
    RetryElapsed(RetryToken),
    ProbeFinished(RetryToken, bool),
}

/// Requests from the embedding application
enum Control {
    Reset,
    Rebind(mpsc::UnboundedReceiver<PlayerEvent>),
}

/// Handle to a running supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    id: SessionId,
    control: mpsc::UnboundedSender<Control>,
    status: watch::Receiver<SupervisorStatus>,
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Control::Reset => f.write_str("Reset"),
            Control::Rebind(_) => f.write_str("Rebind"),
        }
    }
}

impl SupervisorHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Force a hard reset of the player
    pub fn reset(&self) -> Result<()> {
        self.control
            .send(Control::Reset)
            .map_err(|_| Error::SupervisorClosed)
    }

    /// Replace the player event subscription
    ///
    /// The old subscription is dropped and the new one installed in a single
    /// step; no event is handled in between.
    pub fn rebind(&self, events: mpsc::UnboundedReceiver<PlayerEvent>) -> Result<()> {
        self.control
            .send(Control::Rebind(events))
            .map_err(|_| Error::SupervisorClosed)
    }

    /// Current status
    pub fn status(&self) -> SupervisorStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }
}

/// Supervisor for a single player
pub struct Supervisor<P: Player> {
    /// Unique session ID
    id: SessionId,
    /// Supervised player
    player: P,
    /// Player-facing options
    options: PlayerOptions,
    /// Recovery state machine
    recovery: RecoveryMachine,
    /// Bitrate/buffering observer
    observer: PlaybackObserver,
    /// Telemetry batcher
    telemetry: TelemetryHandle,
    /// Reachability probe
    probe: Arc<dyn MediaProbe>,
    /// Overlay message of the running recovery
    message: Option<&'static str>,
    /// Status broadcaster
    status_tx: watch::Sender<SupervisorStatus>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    /// Pending retry timer
    retry_task: Option<JoinHandle<()>>,
    /// Probe in flight
    probe_task: Option<JoinHandle<()>>,
}

impl<P: Player + 'static> Supervisor<P> {
    pub fn new(
        player: P,
        options: PlayerOptions,
        config: &SupervisorConfig,
        probe: Arc<dyn MediaProbe>,
        telemetry: TelemetryHandle,
    ) -> Self {
        let (status_tx, _) = watch::channel(SupervisorStatus::default());
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            id: SessionId::new(),
            player,
            options,
            recovery: RecoveryMachine::new(config),
            observer: PlaybackObserver::new(config.seek_grace()),
            telemetry,
            probe,
            message: None,
            status_tx,
            internal_tx,
            internal_rx,
            retry_task: None,
            probe_task: None,
        };
        supervisor.refresh_context();
        supervisor
    }

    /// Supervisor with HTTP probe and the configured telemetry sink
    ///
    /// Also returns the telemetry batcher task, see [`TelemetryBatcher::spawn`].
    pub fn with_defaults(
        player: P,
        options: PlayerOptions,
        config: &SupervisorConfig,
    ) -> Result<(Self, JoinHandle<usize>)> {
        config.validate()?;
        let probe = Arc::new(HttpProbe::new(config.probe_timeout())?);
        let sink = TelemetryBatcher::sink_for(&config.telemetry)?;
        let (telemetry, batcher) = TelemetryBatcher::new(&config.telemetry, sink).spawn();
        Ok((Self::new(player, options, config, probe, telemetry), batcher))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.recovery.phase()
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    /// Subscribe to status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status_tx.subscribe()
    }

    /// Run the supervisor on its own task
    ///
    /// The task ends when the player event stream closes or every handle is
    /// dropped, and hands the player back.
    pub fn spawn(
        self,
        events: mpsc::UnboundedReceiver<PlayerEvent>,
    ) -> (SupervisorHandle, JoinHandle<P>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let handle = SupervisorHandle {
            id: self.id,
            control: control_tx,
            status: self.status_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(events, control_rx));
        (handle, task)
    }

    #[instrument(skip_all, fields(session_id = %self.id))]
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<PlayerEvent>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) -> P {
        info!(stream = self.options.voc_stream.as_deref(), "Supervisor started");

        loop {
            tokio::select! {
                biased;
                request = control.recv() => match request {
                    Some(Control::Reset) => self.reset(),
                    Some(Control::Rebind(new_events)) => {
                        events = new_events;
                        self.rebind();
                    }
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }

        self.cancel_pending();
        info!("Supervisor stopped");
        self.player
    }

    /// Dispatch a player notification
    pub fn handle_event(&mut self, event: PlayerEvent) {
        debug!(event = event.name(), phase = %self.recovery.phase(), "Player event");

        match event {
            PlayerEvent::Play => {
                let (recovered, action) = self.recovery.on_play();
                if recovered {
                    self.record(TelemetryEvent::Recovery);
                }
                self.apply(action);
            }
            PlayerEvent::Stop => self.recovery.on_stop(&mut self.player),
            PlayerEvent::Seek { position } => {
                debug!(position, "Seek");
                self.observer.on_seek(Instant::now());
            }
            PlayerEvent::Error {
                error,
                clear_overlay,
            } => {
                self.record(TelemetryEvent::Error);

                if let Some(handler) = &self.options.error_handler {
                    let class = self.recovery.classify(&error);
                    if handler.handle(&error, class) == ErrorDisposition::Handled {
                        debug!(error = %error, "Error handled by user handler");
                        return;
                    }
                }

                let outcome = self.recovery.on_error(&mut self.player, &error, clear_overlay);
                if outcome.started_recovery {
                    self.message = Some(outcome.message);
                }
                self.apply(outcome.action);
            }
            PlayerEvent::BufferFull => {
                self.observer.on_buffer_full();
                self.recovery.on_buffer_full(&mut self.player);
            }
            PlayerEvent::BufferingStart => {
                if let Some(event) = self.observer.on_buffering_start(Instant::now()) {
                    self.record(event);
                }
            }
            PlayerEvent::BitrateChanged { bitrate } => {
                if let Some(event) = self.observer.on_bitrate_changed(bitrate) {
                    self.record(event);
                }
            }
            PlayerEvent::ContainerChanged => self.rebind(),
        }

        self.publish();
    }

    /// Hard reset, clears any running recovery
    pub fn reset(&mut self) {
        let action = self.recovery.reset(&mut self.player);
        self.apply(action);
        self.refresh_context();
        self.publish();
    }

    fn handle_internal(&mut self, internal: Internal) {
        let action = match internal {
            Internal::RetryElapsed(token) => {
                self.retry_task = None;
                self.recovery.on_retry_elapsed(&mut self.player, token)
            }
            Internal::ProbeFinished(token, reachable) => {
                self.probe_task = None;
                self.recovery
                    .on_probe_result(&mut self.player, token, reachable)
            }
        };
        self.apply(action);
        self.publish();
    }

    /// The active container changed, start from a clean observer state
    fn rebind(&mut self) {
        debug!("Rebinding to active container");
        self.observer = PlaybackObserver::new(self.observer.seek_grace());
        self.refresh_context();
    }

    fn refresh_context(&self) {
        let relay = self
            .player
            .source()
            .and_then(|source| source.resolve())
            .and_then(|url| url.host_str().map(str::to_string));
        self.telemetry.set_context(TelemetryContext {
            slug: self.options.voc_stream.clone(),
            relay,
        });
    }

    /// Telemetry is only recorded for live content
    fn record(&self, event: TelemetryEvent) {
        if self.player.content_kind().is_live() {
            self.telemetry.record(event);
        }
    }

    fn apply(&mut self, action: Option<RecoveryAction>) {
        let Some(action) = action else {
            return;
        };

        match action {
            RecoveryAction::ScheduleRetry { token, delay } => {
                if let Some(task) = self.retry_task.take() {
                    task.abort();
                }
                let tx = self.internal_tx.clone();
                self.retry_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Internal::RetryElapsed(token));
                }));
            }
            RecoveryAction::Probe { token, url } => {
                let probe = self.probe.clone();
                let tx = self.internal_tx.clone();
                self.probe_task = Some(tokio::spawn(async move {
                    let reachable = match probe.probe(&url).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(error = %e, code = e.error_code(), "Media probe failed");
                            false
                        }
                    };
                    let _ = tx.send(Internal::ProbeFinished(token, reachable));
                }));
            }
            RecoveryAction::CancelRetry => self.cancel_pending(),
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
        if let Some(task) = self.probe_task.take() {
            task.abort();
        }
    }

    fn publish(&mut self) {
        let phase = self.recovery.phase();
        if !phase.is_recovering() {
            self.message = None;
        }
        let status = SupervisorStatus {
            phase,
            message: self.message,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                info!(from = %current.phase, to = %status.phase, "Recovery phase");
                *current = status;
                true
            }
        });
    }
}
