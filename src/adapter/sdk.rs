//! The raw provider SDK boundary.
//!
//! [`AdSdk`] is the minimal interface an ad provider integration has to
//! supply. The core never calls provider APIs except through this trait;
//! everything above it (readiness bookkeeping, load de-duplication, the
//! presentation state machine) lives in the driver.

use tokio::sync::broadcast;

use super::contract::PresentationSurface;
use super::error::ShowError;

/// Raw events a provider SDK reports back to its adapter.
///
/// Implementations must emit presentation events in the canonical order
/// (`WillAppear`, `DidAppear`, `WillDisappear`, `DidDisappear`); the
/// driver forwards them verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdkEvent {
    /// An ad finished loading and is available to present.
    Loaded,
    /// The load attempt failed.
    LoadFailed,
    /// A previously loaded ad went stale.
    Expired,
    /// The ad view is about to appear.
    WillAppear,
    /// The ad view appeared.
    DidAppear,
    /// The ad view is about to disappear.
    WillDisappear,
    /// The ad view disappeared.
    DidDisappear,
    /// Playback of a presenting ad failed.
    PlaybackFailed,
}

/// Minimal interface to one provider SDK ad unit.
///
/// Load and show primitives kick work off; outcomes arrive asynchronously
/// on the [`events`](AdSdk::events) stream. Implementations may run their
/// work anywhere, but events must be delivered through the broadcast
/// channel so the driver can serialize the resulting state changes.
pub trait AdSdk: Send + Sync + 'static {
    /// Begin loading an ad. The outcome arrives as `Loaded`, `LoadFailed`,
    /// or `Expired` on the event stream.
    ///
    /// The driver guarantees at most one outstanding call at a time.
    fn start_load(&self);

    /// Drop any loaded or loading ad.
    fn discard(&self);

    /// Show the loaded ad on the given surface.
    ///
    /// A successful return only means presentation was started; phases
    /// arrive on the event stream.
    fn show(
        &self,
        surface: &dyn PresentationSurface,
        custom_data: Option<&str>,
    ) -> Result<(), ShowError>;

    /// Subscribes to the SDK's event stream.
    fn events(&self) -> broadcast::Receiver<SdkEvent>;

    /// Whether this unit needs custom data for server-to-server callbacks.
    fn requires_custom_data(&self) -> bool {
        false
    }
}
