//! The capability contract every ad unit adapter must satisfy.
//!
//! The orchestrator and the category multiplexer only ever talk to
//! adapters through [`AdUnitAdapter`]; provider SDK specifics stay behind
//! the implementation (see [`super::unit::SdkAdUnit`]).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use super::error::LoadError;
use super::types::{AdUnitTag, PresentationState, PresentationStream};

/// Boxed future returned by adapter operations, for object safety.
pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque host-UI context an ad is presented on top of.
///
/// The core passes the surface through to the provider SDK unmodified.
pub trait PresentationSurface: Send + Sync {
    /// Short label for log lines.
    fn label(&self) -> &str {
        "host"
    }
}

/// Capability contract for one ad unit (provider/category/variant).
///
/// Implementations own their readiness state and publish every observable
/// change from a single serialization domain, so consumers never observe
/// readiness, `ad_presented`, and phase transitions out of order relative
/// to each other.
pub trait AdUnitAdapter: Send + Sync {
    /// The adapter's correlation tag. Constant for its lifetime.
    fn tag(&self) -> &AdUnitTag;

    /// Whether an ad is currently loaded.
    ///
    /// The flag stays `true` while a presentation is in progress and drops
    /// to `false` only after the presentation fully completes or after an
    /// explicit unload.
    fn is_ready(&self) -> bool;

    /// Subscribes to readiness changes.
    ///
    /// The channel replays the most recent value and never notifies for an
    /// unchanged value: a `true -> true` or `false -> false` transition is
    /// not observable.
    fn readiness(&self) -> watch::Receiver<bool>;

    /// Loads an ad if none is loaded.
    ///
    /// Idempotent under concurrent invocation: callers of an in-flight
    /// load join it rather than starting a second one, and all observe the
    /// same outcome. A call while an ad is already loaded resolves
    /// immediately with the tag.
    fn load_ad(&self) -> AdapterFuture<'_, Result<AdUnitTag, LoadError>>;

    /// Unloads the ad if one is loaded.
    ///
    /// Resolves with the tag once the unload is finished; afterwards
    /// `is_ready()` is `false`.
    fn unload_ad(&self) -> AdapterFuture<'_, AdUnitTag>;

    /// Presents the loaded ad on the given surface.
    ///
    /// Emits the ordered phase sequence and closes after the terminal
    /// phase. If no ad is loaded the stream emits `NoAdsLoaded` and
    /// completes. `custom_data` is forwarded to adapters that require it
    /// for server-to-server reward callbacks; such an adapter emits
    /// `CustomDataNotSet` when it is absent.
    fn present_ad(
        &self,
        surface: Arc<dyn PresentationSurface>,
        custom_data: Option<String>,
    ) -> PresentationStream;

    /// Long-lived stream notifying once each time a presentation begins.
    ///
    /// No replay: subscribers only see presentations that start after they
    /// subscribe.
    fn ad_presented(&self) -> broadcast::Receiver<AdUnitTag>;

    /// Long-lived stream rebroadcasting every phase of every presentation
    /// this adapter performs. No replay.
    fn presentation_status(&self) -> broadcast::Receiver<PresentationState>;

    /// Whether this adapter needs custom data to serve a presentation.
    fn requires_custom_data(&self) -> bool {
        false
    }
}
