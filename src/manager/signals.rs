//! Can-present signal recomputation.
//!
//! One [`SignalLoop`] task per manager recomputes and publishes all three
//! public signals. Because a single task performs every publication, all
//! consumers observe `ad_is_showing`, category readiness, and the
//! can-present values in one consistent order.

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::environment::{EnvironmentFeed, TunnelMode};

/// Presentation begin/end notifications from the phase forwarding tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ShowingEvent {
    /// A presentation emitted `WillAppear`.
    Began,
    /// A presentation reached its terminal phase.
    Ended,
}

/// Inputs and outputs of the signal recomputation task.
pub(crate) struct SignalLoop {
    pub(crate) environment: EnvironmentFeed,
    pub(crate) interstitial_ready: watch::Receiver<bool>,
    pub(crate) rewarded_ready: watch::Receiver<bool>,
    pub(crate) showing_events: mpsc::Receiver<ShowingEvent>,
    pub(crate) interstitial_can_tx: watch::Sender<bool>,
    pub(crate) rewarded_can_tx: watch::Sender<bool>,
    pub(crate) showing_tx: watch::Sender<bool>,
}

impl SignalLoop {
    /// Runs until shutdown. Recomputes on every input change; the watch
    /// channels coalesce unchanged values, so subscribers only see real
    /// transitions.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        let mut showing = false;
        // Establish values for inputs that changed before startup.
        self.publish(showing);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                event = self.showing_events.recv() => match event {
                    Some(ShowingEvent::Began) => {
                        showing = true;
                        self.publish(showing);
                    }
                    Some(ShowingEvent::Ended) => {
                        showing = false;
                        self.publish(showing);
                    }
                    None => break,
                },

                changed = self.environment.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.publish(showing);
                }

                changed = self.interstitial_ready.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.publish(showing);
                }

                changed = self.rewarded_ready.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.publish(showing);
                }
            }
        }
    }

    fn publish(&self, showing: bool) {
        let env = *self.environment.borrow();
        let interstitial_ready = *self.interstitial_ready.borrow();
        let rewarded_ready = *self.rewarded_ready.borrow();

        // The untunneled interstitial is only presentable while untunneled;
        // rewarded video picks a variant at request time, so only the
        // category readiness and app state gate it.
        let interstitial_can = env.foreground
            && env.tunnel_mode == TunnelMode::Untunneled
            && interstitial_ready
            && !showing;
        let rewarded_can = env.foreground && rewarded_ready && !showing;

        Self::set(&self.showing_tx, showing);
        Self::set(&self.interstitial_can_tx, interstitial_can);
        Self::set(&self.rewarded_can_tx, rewarded_can);

        debug!(
            foreground = env.foreground,
            tunnel_mode = %env.tunnel_mode,
            showing,
            interstitial_can,
            rewarded_can,
            "signals recomputed"
        );
    }

    fn set(tx: &watch::Sender<bool>, value: bool) {
        tx.send_if_modified(|current| {
            if *current != value {
                *current = value;
                true
            } else {
                false
            }
        });
    }
}
