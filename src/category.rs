//! Category multiplexer.
//!
//! A category is a logical ad slot (e.g. "rewarded video") that may be
//! served by more than one adapter, typically one per tunneling variant.
//! The multiplexer folds member readiness into a single boolean signal
//! and picks the serving adapter for a presentation request.
//!
//! # Readiness aggregation
//!
//! The combined value is the OR of every member's readiness. One
//! forwarder task per member reports changes to a single aggregation
//! task, which recomputes synchronously on every constituent change and
//! publishes through a watch channel with `send_if_modified`: distinct
//! derived values are never dropped, consecutive identical values are
//! coalesced.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::{AdUnitAdapter, PresentationStream, PresentationSurface};
use crate::environment::TunnelMode;

/// One adapter registered under a category.
pub struct CategoryMember {
    adapter: Arc<dyn AdUnitAdapter>,
    variant: TunnelMode,
}

impl CategoryMember {
    /// The member's adapter.
    pub fn adapter(&self) -> &Arc<dyn AdUnitAdapter> {
        &self.adapter
    }

    /// The tunneling variant this member serves.
    pub fn variant(&self) -> TunnelMode {
        self.variant
    }
}

/// Multiplexes the adapters of one logical ad category.
pub struct AdCategory {
    name: &'static str,
    members: Vec<CategoryMember>,
    readiness_rx: watch::Receiver<bool>,
}

impl AdCategory {
    /// Creates the category and spawns its readiness aggregation tasks.
    ///
    /// Must be called within a tokio runtime. The aggregation tasks stop
    /// when `shutdown` is cancelled.
    pub fn new(
        name: &'static str,
        members: Vec<(Arc<dyn AdUnitAdapter>, TunnelMode)>,
        shutdown: CancellationToken,
    ) -> Self {
        let members: Vec<CategoryMember> = members
            .into_iter()
            .map(|(adapter, variant)| CategoryMember { adapter, variant })
            .collect();

        // Subscribe before reading the initial value: a flip that lands
        // after subscription is notified, one that lands before is
        // captured by the initial OR. Nothing is missed either way.
        let member_rxs: Vec<watch::Receiver<bool>> =
            members.iter().map(|m| m.adapter.readiness()).collect();
        let initial = member_rxs.iter().any(|r| *r.borrow());
        let (readiness_tx, readiness_rx) = watch::channel(initial);

        // A queued notification already covers any member change that
        // lands before its recompute runs, so a small backlog suffices.
        let (notify_tx, notify_rx) = mpsc::channel::<()>(members.len().max(1) * 4);

        for mut member_rx in member_rxs {
            let notify = notify_tx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => break,

                        changed = member_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            if notify.send(()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        let readers: Vec<watch::Receiver<bool>> =
            members.iter().map(|m| m.adapter.readiness()).collect();
        tokio::spawn(Self::aggregate(
            name,
            readers,
            notify_rx,
            readiness_tx,
            shutdown,
        ));

        Self {
            name,
            members,
            readiness_rx,
        }
    }

    async fn aggregate(
        name: &'static str,
        readers: Vec<watch::Receiver<bool>>,
        mut notify_rx: mpsc::Receiver<()>,
        readiness_tx: watch::Sender<bool>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                notified = notify_rx.recv() => {
                    if notified.is_none() {
                        break;
                    }
                    let combined = readers.iter().any(|r| *r.borrow());
                    let changed = readiness_tx.send_if_modified(|current| {
                        if *current != combined {
                            *current = combined;
                            true
                        } else {
                            false
                        }
                    });
                    if changed {
                        debug!(category = name, ready = combined, "category readiness changed");
                    }
                }
            }
        }
    }

    /// The category's name, for log lines.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The registered members.
    pub fn members(&self) -> &[CategoryMember] {
        &self.members
    }

    /// Whether any member currently has an ad loaded.
    ///
    /// Reads member flags directly for the freshest value; the aggregated
    /// channel trails by one scheduler hop.
    pub fn is_ready(&self) -> bool {
        self.members.iter().any(|m| m.adapter.is_ready())
    }

    /// Subscribes to the combined readiness signal.
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.readiness_rx.clone()
    }

    /// Picks the adapter that would serve a presentation in the given
    /// mode: the matching-variant member if it is ready, else any other
    /// ready member.
    pub fn select(&self, mode: TunnelMode) -> Option<&Arc<dyn AdUnitAdapter>> {
        if let Some(member) = self
            .members
            .iter()
            .find(|m| m.variant == mode && m.adapter.is_ready())
        {
            return Some(&member.adapter);
        }
        self.members
            .iter()
            .find(|m| m.adapter.is_ready())
            .map(|m| &m.adapter)
    }

    /// Presents through the selected adapter, forwarding its phase stream
    /// verbatim. Returns `None` when no member is ready.
    pub fn present(
        &self,
        mode: TunnelMode,
        surface: Arc<dyn PresentationSurface>,
        custom_data: Option<String>,
    ) -> Option<PresentationStream> {
        let adapter = self.select(mode)?;
        debug!(
            category = self.name,
            tag = %adapter.tag(),
            mode = %mode,
            "presenting via selected adapter"
        );
        Some(adapter.present_ad(surface, custom_data))
    }
}

impl std::fmt::Debug for AdCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdCategory")
            .field("name", &self.name)
            .field("members", &self.members.len())
            .field("ready", &self.is_ready())
            .finish()
    }
}
