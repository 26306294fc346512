//! SDK-backed ad unit adapter.
//!
//! [`SdkAdUnit`] implements [`AdUnitAdapter`] by spawning one background
//! driver task that owns all mutable state for the unit. Commands from
//! callers and raw SDK events are multiplexed in a single `select!` loop,
//! so every observable change (readiness, `ad_presented`, phases) is
//! published from exactly one task, in order.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         SdkAdUnit                          │
//! │                                                            │
//! │  load_ad / unload_ad / present_ad                          │
//! │        │ Command channel                                   │
//! │        ▼                                                   │
//! │  ┌──────────┐   SdkEvent channel   ┌───────────────────┐   │
//! │  │  Driver  │ ◄─────────────────── │   provider AdSdk  │   │
//! │  └────┬─────┘                      └───────────────────┘   │
//! │       │ readiness (watch) · ad_presented / status (bcast)  │
//! └───────┼────────────────────────────────────────────────────┘
//!         ▼ consumers
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::contract::{AdUnitAdapter, AdapterFuture, PresentationSurface};
use super::error::LoadError;
use super::sdk::{AdSdk, SdkEvent};
use super::types::{AdUnitTag, PresentationState, PresentationStream, PHASE_CHANNEL_CAPACITY};

/// Default capacity of the caller command channel.
pub const DEFAULT_COMMAND_CAPACITY: usize = 16;

/// Default capacity of the `ad_presented` and `presentation_status`
/// broadcast channels.
pub const DEFAULT_EVENT_CAPACITY: usize = 32;

/// Configuration for one [`SdkAdUnit`].
#[derive(Clone, Copy, Debug)]
pub struct AdapterConfig {
    /// Caller command channel capacity.
    pub command_capacity: usize,
    /// Broadcast channel capacity for presentation events.
    pub event_capacity: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Caller requests handled by the driver.
enum Command {
    Load {
        outcome: oneshot::Sender<Result<AdUnitTag, LoadError>>,
    },
    Unload {
        done: oneshot::Sender<AdUnitTag>,
    },
    Present {
        surface: Arc<dyn PresentationSurface>,
        custom_data: Option<String>,
        phases: mpsc::Sender<PresentationState>,
    },
}

/// Ad unit adapter backed by a provider SDK.
///
/// Cheap to share behind an `Arc`; all clones of the returned channels
/// talk to the same driver task. The driver runs until
/// [`shutdown`](SdkAdUnit::shutdown) is called or the SDK's event stream
/// closes.
pub struct SdkAdUnit {
    tag: AdUnitTag,
    command_tx: mpsc::Sender<Command>,
    readiness_rx: watch::Receiver<bool>,
    ad_presented_tx: broadcast::Sender<AdUnitTag>,
    status_tx: broadcast::Sender<PresentationState>,
    requires_custom_data: bool,
    shutdown: CancellationToken,
}

impl SdkAdUnit {
    /// Creates the adapter and spawns its driver task.
    ///
    /// Must be called within a tokio runtime.
    pub fn new<S: AdSdk>(tag: AdUnitTag, sdk: Arc<S>) -> Self {
        Self::with_config(tag, sdk, AdapterConfig::default())
    }

    /// Creates the adapter with custom channel capacities.
    pub fn with_config<S: AdSdk>(tag: AdUnitTag, sdk: Arc<S>, config: AdapterConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
        let (readiness_tx, readiness_rx) = watch::channel(false);
        let (ad_presented_tx, _) = broadcast::channel(config.event_capacity);
        let (status_tx, _) = broadcast::channel(config.event_capacity);
        let shutdown = CancellationToken::new();

        let requires_custom_data = sdk.requires_custom_data();
        let events = sdk.events();

        let driver = Driver {
            tag: tag.clone(),
            sdk,
            readiness_tx,
            ad_presented_tx: ad_presented_tx.clone(),
            status_tx: status_tx.clone(),
            load_waiters: Vec::new(),
            load_in_flight: false,
            presentation: None,
        };
        tokio::spawn(driver.run(command_rx, events, shutdown.clone()));

        Self {
            tag,
            command_tx,
            readiness_rx,
            ad_presented_tx,
            status_tx,
            requires_custom_data,
            shutdown,
        }
    }

    /// Stops the driver task. Pending loads resolve as failed; an active
    /// presentation's stream closes without further phases.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl AdUnitAdapter for SdkAdUnit {
    fn tag(&self) -> &AdUnitTag {
        &self.tag
    }

    fn is_ready(&self) -> bool {
        *self.readiness_rx.borrow()
    }

    fn readiness(&self) -> watch::Receiver<bool> {
        self.readiness_rx.clone()
    }

    fn load_ad(&self) -> AdapterFuture<'_, Result<AdUnitTag, LoadError>> {
        let command_tx = self.command_tx.clone();
        let tag = self.tag.clone();
        Box::pin(async move {
            let (outcome_tx, outcome_rx) = oneshot::channel();
            if command_tx
                .send(Command::Load {
                    outcome: outcome_tx,
                })
                .await
                .is_err()
            {
                warn!(tag = %tag, "adapter driver is gone, load treated as failed");
                return Err(LoadError::FailedToLoad);
            }
            match outcome_rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(LoadError::FailedToLoad),
            }
        })
    }

    fn unload_ad(&self) -> AdapterFuture<'_, AdUnitTag> {
        let command_tx = self.command_tx.clone();
        let tag = self.tag.clone();
        Box::pin(async move {
            let (done_tx, done_rx) = oneshot::channel();
            if command_tx.send(Command::Unload { done: done_tx }).await.is_err() {
                return tag;
            }
            done_rx.await.unwrap_or(tag)
        })
    }

    fn present_ad(
        &self,
        surface: Arc<dyn PresentationSurface>,
        custom_data: Option<String>,
    ) -> PresentationStream {
        let (phases, stream) = PresentationStream::channel(PHASE_CHANNEL_CAPACITY);
        let command = Command::Present {
            surface,
            custom_data,
            phases,
        };
        if let Err(err) = self.command_tx.try_send(command) {
            // Dropping the sender closes the stream with zero phases.
            warn!(tag = %self.tag, error = %err, "presentation request not accepted");
        }
        stream
    }

    fn ad_presented(&self) -> broadcast::Receiver<AdUnitTag> {
        self.ad_presented_tx.subscribe()
    }

    fn presentation_status(&self) -> broadcast::Receiver<PresentationState> {
        self.status_tx.subscribe()
    }

    fn requires_custom_data(&self) -> bool {
        self.requires_custom_data
    }
}

impl std::fmt::Debug for SdkAdUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkAdUnit")
            .field("tag", &self.tag)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

/// The background task owning all mutable state for one ad unit.
struct Driver<S: AdSdk> {
    tag: AdUnitTag,
    sdk: Arc<S>,
    readiness_tx: watch::Sender<bool>,
    ad_presented_tx: broadcast::Sender<AdUnitTag>,
    status_tx: broadcast::Sender<PresentationState>,
    /// Callers parked on the single in-flight load.
    load_waiters: Vec<oneshot::Sender<Result<AdUnitTag, LoadError>>>,
    load_in_flight: bool,
    /// Phase sink of the active presentation attempt, if any.
    presentation: Option<mpsc::Sender<PresentationState>>,
}

impl<S: AdSdk> Driver<S> {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<Command>,
        mut events: broadcast::Receiver<SdkEvent>,
        shutdown: CancellationToken,
    ) {
        debug!(tag = %self.tag, "ad unit driver starting");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!(tag = %self.tag, "ad unit driver shutting down");
                    break;
                }

                command = command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // All handles dropped.
                    None => break,
                },

                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(tag = %self.tag, skipped, "SDK event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!(tag = %self.tag, "SDK event stream closed, stopping driver");
                        break;
                    }
                },
            }
        }
        // Unresolved waiters observe a failed load rather than hanging.
        for waiter in self.load_waiters.drain(..) {
            let _ = waiter.send(Err(LoadError::FailedToLoad));
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Load { outcome } => self.handle_load(outcome),
            Command::Unload { done } => self.handle_unload(done),
            Command::Present {
                surface,
                custom_data,
                phases,
            } => self.handle_present(surface, custom_data, phases),
        }
    }

    fn handle_load(&mut self, outcome: oneshot::Sender<Result<AdUnitTag, LoadError>>) {
        if *self.readiness_tx.borrow() {
            // Already loaded; notify without touching the SDK.
            let _ = outcome.send(Ok(self.tag.clone()));
            return;
        }
        self.load_waiters.push(outcome);
        if !self.load_in_flight {
            self.load_in_flight = true;
            debug!(tag = %self.tag, "starting SDK load");
            self.sdk.start_load();
        } else {
            debug!(
                tag = %self.tag,
                waiters = self.load_waiters.len(),
                "joining in-flight SDK load"
            );
        }
    }

    fn handle_unload(&mut self, done: oneshot::Sender<AdUnitTag>) {
        self.sdk.discard();
        if self.load_in_flight {
            // A discard aborts the attempt; parked callers are failed.
            debug!(
                tag = %self.tag,
                waiters = self.load_waiters.len(),
                "unload aborts in-flight load"
            );
            self.load_in_flight = false;
            for waiter in self.load_waiters.drain(..) {
                let _ = waiter.send(Err(LoadError::FailedToLoad));
            }
        }
        self.set_ready(false);
        let _ = done.send(self.tag.clone());
    }

    fn handle_present(
        &mut self,
        surface: Arc<dyn PresentationSurface>,
        custom_data: Option<String>,
        phases: mpsc::Sender<PresentationState>,
    ) {
        if self.presentation.is_some() {
            self.reject_presentation(&phases, PresentationState::InappropriateState);
            return;
        }
        if !*self.readiness_tx.borrow() {
            self.reject_presentation(&phases, PresentationState::NoAdsLoaded);
            return;
        }
        if self.sdk.requires_custom_data() && custom_data.is_none() {
            self.reject_presentation(&phases, PresentationState::CustomDataNotSet);
            return;
        }
        match self.sdk.show(surface.as_ref(), custom_data.as_deref()) {
            Ok(()) => {
                debug!(tag = %self.tag, surface = surface.label(), "presentation started");
                self.presentation = Some(phases);
            }
            Err(err) => {
                warn!(tag = %self.tag, error = %err, "SDK refused to show ad");
                self.reject_presentation(&phases, PresentationState::FailedToPlay);
            }
        }
    }

    fn handle_event(&mut self, event: SdkEvent) {
        match event {
            SdkEvent::Loaded => {
                self.load_in_flight = false;
                self.set_ready(true);
                let tag = self.tag.clone();
                debug!(tag = %tag, waiters = self.load_waiters.len(), "ad loaded");
                for waiter in self.load_waiters.drain(..) {
                    let _ = waiter.send(Ok(tag.clone()));
                }
            }
            SdkEvent::LoadFailed => {
                self.load_in_flight = false;
                debug!(tag = %self.tag, "ad load failed");
                for waiter in self.load_waiters.drain(..) {
                    let _ = waiter.send(Err(LoadError::FailedToLoad));
                }
            }
            SdkEvent::Expired => {
                debug!(tag = %self.tag, "loaded ad expired");
                self.set_ready(false);
                if self.load_in_flight {
                    self.load_in_flight = false;
                    for waiter in self.load_waiters.drain(..) {
                        let _ = waiter.send(Err(LoadError::Expired));
                    }
                }
            }
            SdkEvent::WillAppear => {
                if self.presentation.is_some() {
                    let _ = self.ad_presented_tx.send(self.tag.clone());
                    self.emit_phase(PresentationState::WillAppear);
                }
            }
            SdkEvent::DidAppear => {
                if self.presentation.is_some() {
                    self.emit_phase(PresentationState::DidAppear);
                }
            }
            SdkEvent::WillDisappear => {
                if self.presentation.is_some() {
                    self.emit_phase(PresentationState::WillDisappear);
                }
            }
            SdkEvent::DidDisappear => {
                if self.presentation.is_some() {
                    self.emit_phase(PresentationState::DidDisappear);
                    // The presented ad is consumed.
                    self.set_ready(false);
                }
            }
            SdkEvent::PlaybackFailed => {
                if self.presentation.is_some() {
                    self.emit_phase(PresentationState::FailedToPlay);
                }
            }
        }
    }

    /// Emits a phase to the active attempt and mirrors it to the
    /// long-lived status stream. Terminal phases close the attempt.
    fn emit_phase(&mut self, phase: PresentationState) {
        let _ = self.status_tx.send(phase);
        if let Some(tx) = &self.presentation {
            if tx.try_send(phase).is_err() {
                // Caller stopped listening; the presentation still runs to
                // its terminal phase on screen.
                debug!(tag = %self.tag, phase = %phase, "presentation listener gone");
            }
        }
        if phase.is_terminal() {
            self.presentation = None;
        }
    }

    /// Answers a presentation request with a single terminal error phase.
    fn reject_presentation(
        &self,
        phases: &mpsc::Sender<PresentationState>,
        phase: PresentationState,
    ) {
        debug!(tag = %self.tag, phase = %phase, "presentation rejected");
        let _ = self.status_tx.send(phase);
        let _ = phases.try_send(phase);
    }

    fn set_ready(&self, ready: bool) {
        let changed = self.readiness_tx.send_if_modified(|current| {
            if *current != ready {
                *current = ready;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(tag = %self.tag, ready, "readiness changed");
        }
    }
}
