//! Presentation orchestrator.
//!
//! [`AdManager`] is the single entry point the host application uses: it
//! owns the can-present signals, gatekeeps presentation requests against
//! current app/network state, forwards the serving adapter's phase stream
//! verbatim, and keeps every registered adapter loaded through the retry
//! controller.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          AdManager                           │
//! │                                                              │
//! │  environment ──► ┌─────────────┐ ──► untunneled_interstitial │
//! │  category    ──► │ SignalLoop  │ ──► _can_present            │
//! │  readiness   ──► │ (one task)  │ ──► rewarded_video_can_...  │
//! │  show events ──► └─────────────┘ ──► ad_is_showing           │
//! │                                                              │
//! │  present_* ──► gate check ──► AdCategory ──► adapter phases  │
//! │                                                              │
//! │  keeper tasks: LoadController.load() per adapter, re-armed   │
//! │  on readiness drops and environment transitions              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. **Creation**: `new()` wires the categories and channels.
//! 2. **Startup**: `initialize()` spawns the signal loop and keepers;
//!    idempotent, call it once during app launch.
//! 3. **Operation**: the host reads signals and calls `present_*`.
//! 4. **Shutdown**: `shutdown()` cancels every spawned task.

mod signals;

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{
    AdUnitAdapter, PresentationState, PresentationStream, PresentationSurface,
    PHASE_CHANNEL_CAPACITY,
};
use crate::category::AdCategory;
use crate::environment::{EnvironmentFeed, TunnelMode};
use crate::retry::{LoadController, LoadResult, RetryPolicy};

use signals::{ShowingEvent, SignalLoop};

/// Tag name of the untunneled interstitial unit.
pub const UNTUNNELED_INTERSTITIAL: &str = "UntunneledInterstitial";

/// Tag name of the untunneled rewarded video unit.
pub const UNTUNNELED_REWARDED_VIDEO: &str = "UntunneledRewardedVideo";

/// Tag name of the tunneled rewarded video unit.
pub const TUNNELED_REWARDED_VIDEO: &str = "TunneledRewardedVideo";

/// Capacity of the showing-event channel between phase forwarding tasks
/// and the signal loop.
const SHOWING_EVENT_CAPACITY: usize = 16;

/// Configuration for the [`AdManager`].
#[derive(Clone, Copy, Debug)]
pub struct ManagerConfig {
    /// Retry policy applied by the load controller.
    pub retry: RetryPolicy,
    /// Whether keeper tasks keep adapters loaded automatically.
    ///
    /// When disabled the host drives loading itself through the adapters
    /// or a [`LoadController`].
    pub auto_reload: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            auto_reload: true,
        }
    }
}

impl ManagerConfig {
    /// Overrides the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enables or disables the keeper tasks.
    pub fn with_auto_reload(mut self, enabled: bool) -> Self {
        self.auto_reload = enabled;
        self
    }
}

/// Parts consumed by `initialize()`.
struct Startup {
    interstitial_can_tx: watch::Sender<bool>,
    rewarded_can_tx: watch::Sender<bool>,
    showing_tx: watch::Sender<bool>,
    showing_events_rx: mpsc::Receiver<ShowingEvent>,
}

/// The presentation orchestrator.
///
/// Explicitly constructed and dependency-injected; hosts that need a
/// process-wide instance wrap it in an `Arc` themselves.
pub struct AdManager {
    interstitial: AdCategory,
    rewarded: AdCategory,
    environment: EnvironmentFeed,
    controller: Arc<LoadController>,
    config: ManagerConfig,
    interstitial_can_rx: watch::Receiver<bool>,
    rewarded_can_rx: watch::Receiver<bool>,
    showing_rx: watch::Receiver<bool>,
    showing_events_tx: mpsc::Sender<ShowingEvent>,
    startup: Mutex<Option<Startup>>,
    shutdown: CancellationToken,
}

impl AdManager {
    /// Creates the manager from its adapters and the environment feed.
    ///
    /// Category readiness aggregation starts immediately; signal
    /// publication and automatic loading start with
    /// [`initialize`](AdManager::initialize). Must be called within a
    /// tokio runtime.
    pub fn new(
        interstitial_adapters: Vec<(Arc<dyn AdUnitAdapter>, TunnelMode)>,
        rewarded_adapters: Vec<(Arc<dyn AdUnitAdapter>, TunnelMode)>,
        environment: EnvironmentFeed,
        config: ManagerConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let interstitial = AdCategory::new(
            "untunneled-interstitial",
            interstitial_adapters,
            shutdown.child_token(),
        );
        let rewarded =
            AdCategory::new("rewarded-video", rewarded_adapters, shutdown.child_token());

        let (interstitial_can_tx, interstitial_can_rx) = watch::channel(false);
        let (rewarded_can_tx, rewarded_can_rx) = watch::channel(false);
        let (showing_tx, showing_rx) = watch::channel(false);
        let (showing_events_tx, showing_events_rx) = mpsc::channel(SHOWING_EVENT_CAPACITY);

        Self {
            interstitial,
            rewarded,
            environment,
            controller: Arc::new(LoadController::new(config.retry)),
            config,
            interstitial_can_rx,
            rewarded_can_rx,
            showing_rx,
            showing_events_tx,
            startup: Mutex::new(Some(Startup {
                interstitial_can_tx,
                rewarded_can_tx,
                showing_tx,
                showing_events_rx,
            })),
            shutdown,
        }
    }

    /// One-time startup: spawns the signal loop and, unless disabled, the
    /// keeper tasks. Safe to call more than once; repeat calls are no-ops.
    pub fn initialize(&self) {
        let startup = match self.startup.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(startup) = startup else {
            debug!("ad manager already initialized");
            return;
        };

        info!(
            interstitial_adapters = self.interstitial.members().len(),
            rewarded_adapters = self.rewarded.members().len(),
            "initializing ad manager"
        );

        let signal_loop = SignalLoop {
            environment: self.environment.clone(),
            interstitial_ready: self.interstitial.readiness(),
            rewarded_ready: self.rewarded.readiness(),
            showing_events: startup.showing_events_rx,
            interstitial_can_tx: startup.interstitial_can_tx,
            rewarded_can_tx: startup.rewarded_can_tx,
            showing_tx: startup.showing_tx,
        };
        tokio::spawn(signal_loop.run(self.shutdown.clone()));

        if self.config.auto_reload {
            self.spawn_keepers();
        }
    }

    /// Emits `true` while the untunneled interstitial can be presented.
    ///
    /// Most-recent-value-replayed; initially `false`. Recomputed whenever
    /// category readiness or app/network state changes.
    pub fn untunneled_interstitial_can_present(&self) -> watch::Receiver<bool> {
        self.interstitial_can_rx.clone()
    }

    /// Emits `true` while a tunneled or untunneled rewarded video can be
    /// presented. Most-recent-value-replayed; initially `false`.
    pub fn rewarded_video_can_present(&self) -> watch::Receiver<bool> {
        self.rewarded_can_rx.clone()
    }

    /// Emits `true` while an ad is on screen. Most-recent-value-replayed;
    /// initially `false`.
    pub fn ad_is_showing(&self) -> watch::Receiver<bool> {
        self.showing_rx.clone()
    }

    /// Presents the untunneled interstitial.
    ///
    /// If the app state is inappropriate (background, tunneled, an ad
    /// already showing, or no ad loaded) the returned stream completes
    /// with zero phases. A ready-but-erroring ad yields exactly one
    /// terminal error phase. Otherwise the stream emits the canonical
    /// sequence `WillAppear -> DidAppear -> WillDisappear -> DidDisappear`
    /// and completes.
    pub fn present_interstitial(
        &self,
        surface: Arc<dyn PresentationSurface>,
    ) -> PresentationStream {
        self.present_category(&self.interstitial, surface, None, true)
    }

    /// Presents a tunneled or untunneled rewarded video.
    ///
    /// Same contract as
    /// [`present_interstitial`](AdManager::present_interstitial); the
    /// serving adapter is chosen by
    /// the current tunneling mode with fallback to any other ready
    /// adapter. `custom_data` is included in the ad service
    /// server-to-server callback; an adapter that requires it emits
    /// `CustomDataNotSet` when it is absent.
    pub fn present_rewarded_video(
        &self,
        surface: Arc<dyn PresentationSurface>,
        custom_data: Option<String>,
    ) -> PresentationStream {
        self.present_category(&self.rewarded, surface, custom_data, false)
    }

    /// Stops the signal loop, keepers, and category aggregation tasks.
    pub fn shutdown(&self) {
        info!("shutting down ad manager");
        self.shutdown.cancel();
    }

    fn present_category(
        &self,
        category: &AdCategory,
        surface: Arc<dyn PresentationSurface>,
        custom_data: Option<String>,
        require_untunneled: bool,
    ) -> PresentationStream {
        let env = *self.environment.borrow();
        let showing = *self.showing_rx.borrow();
        let appropriate = env.foreground
            && !showing
            && (!require_untunneled || env.tunnel_mode == TunnelMode::Untunneled);

        if !appropriate || !category.is_ready() {
            debug!(
                category = category.name(),
                foreground = env.foreground,
                tunnel_mode = %env.tunnel_mode,
                showing,
                ready = category.is_ready(),
                "presentation request rejected by gate check"
            );
            return PresentationStream::empty();
        }

        match category.present(env.tunnel_mode, surface, custom_data) {
            // Readiness was lost between the gate check and selection.
            None => PresentationStream::empty(),
            Some(inner) => self.forward_phases(inner),
        }
    }

    /// Re-emits the serving adapter's phases to the caller while keeping
    /// `ad_is_showing` in step with `WillAppear` and the terminal phase.
    fn forward_phases(&self, mut inner: PresentationStream) -> PresentationStream {
        let (tx, outer) = PresentationStream::channel(PHASE_CHANNEL_CAPACITY);
        let showing_events = self.showing_events_tx.clone();
        tokio::spawn(async move {
            let mut began = false;
            while let Some(phase) = inner.next().await {
                if phase == PresentationState::WillAppear && !began {
                    began = true;
                    let _ = showing_events.send(ShowingEvent::Began).await;
                }
                // The caller may stop listening; the presentation still
                // runs to its terminal phase.
                let _ = tx.try_send(phase);
                if phase.is_terminal() {
                    break;
                }
            }
            if began {
                let _ = showing_events.send(ShowingEvent::Ended).await;
            }
        });
        outer
    }

    fn spawn_keepers(&self) {
        for category in [&self.interstitial, &self.rewarded] {
            for member in category.members() {
                let adapter = Arc::clone(member.adapter());
                let controller = Arc::clone(&self.controller);
                let environment = self.environment.clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(keeper_loop(adapter, controller, environment, shutdown));
            }
        }
    }
}

impl std::fmt::Debug for AdManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdManager")
            .field("interstitial", &self.interstitial)
            .field("rewarded", &self.rewarded)
            .field("ad_is_showing", &*self.showing_rx.borrow())
            .finish_non_exhaustive()
    }
}

/// Keeps one adapter loaded: runs a load cycle whenever no ad is held,
/// re-arms on readiness drops (expiry, consumed ad) and on environment
/// transitions, and parks after an exhausted cycle until the next
/// trigger.
async fn keeper_loop(
    adapter: Arc<dyn AdUnitAdapter>,
    controller: Arc<LoadController>,
    mut environment: EnvironmentFeed,
    shutdown: CancellationToken,
) {
    let tag = adapter.tag().clone();
    let mut readiness = adapter.readiness();
    debug!(tag = %tag, "keeper starting");

    loop {
        if !*readiness.borrow() {
            match controller.load(Arc::clone(&adapter)).await {
                LoadResult::Loaded(_) => {
                    debug!(tag = %tag, "keeper loaded ad");
                }
                LoadResult::RetriesExhausted { last_error, .. } => {
                    warn!(
                        tag = %tag,
                        error = %last_error,
                        "keeper load exhausted retries, parking until next trigger"
                    );
                    tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => break,

                        changed = environment.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                }
            }
        }

        // Wait for the held ad to be consumed or go stale, or for an
        // environment transition worth reacting to.
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            changed = readiness.changed() => {
                if changed.is_err() {
                    break;
                }
            }

            changed = environment.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(tag = %tag, "keeper stopped");
}
