//! Adapter types: unit tags, presentation phases, and phase streams.

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Channel capacity for a single presentation attempt's phase stream.
///
/// The canonical sequence is four phases; error attempts emit one. The
/// capacity leaves headroom so the driver never blocks on a slow consumer.
pub(crate) const PHASE_CHANNEL_CAPACITY: usize = 8;

/// Unique identifier for an ad unit adapter instance.
///
/// A tag names one provider/category/tunneling-variant combination and is
/// constant for the adapter's lifetime. It is used as the correlation key
/// across readiness, load, and presentation streams.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AdUnitTag(Arc<str>);

impl AdUnitTag {
    /// Create a tag from its string name.
    pub fn new(tag: impl Into<Arc<str>>) -> Self {
        Self(tag.into())
    }

    /// The tag's string name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdUnitTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AdUnitTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// One discrete step of a presentation attempt's lifecycle.
///
/// A non-empty phase stream is always a prefix of
/// `WillAppear -> DidAppear -> WillDisappear -> DidDisappear`, or exactly
/// one of the error phases. Once a terminal phase is emitted, nothing
/// further is emitted for that attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentationState {
    /// The ad view is about to appear.
    WillAppear,
    /// The ad view appeared.
    DidAppear,
    /// The ad view is about to disappear.
    WillDisappear,
    /// The ad view disappeared. Terminal.
    DidDisappear,
    /// The app is not in a state where this ad can be presented. Terminal.
    InappropriateState,
    /// No ad is loaded. Terminal.
    NoAdsLoaded,
    /// The ad failed to play after the presentation was started. Terminal.
    FailedToPlay,
    /// The serving adapter requires custom data and none was supplied. Terminal.
    CustomDataNotSet,
}

impl PresentationState {
    /// Returns true if this phase ends the attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DidDisappear
                | Self::InappropriateState
                | Self::NoAdsLoaded
                | Self::FailedToPlay
                | Self::CustomDataNotSet
        )
    }

    /// Returns true if this phase is a terminal error.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::InappropriateState
                | Self::NoAdsLoaded
                | Self::FailedToPlay
                | Self::CustomDataNotSet
        )
    }
}

impl fmt::Display for PresentationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WillAppear => write!(f, "WillAppear"),
            Self::DidAppear => write!(f, "DidAppear"),
            Self::WillDisappear => write!(f, "WillDisappear"),
            Self::DidDisappear => write!(f, "DidDisappear"),
            Self::InappropriateState => write!(f, "InappropriateState"),
            Self::NoAdsLoaded => write!(f, "NoAdsLoaded"),
            Self::FailedToPlay => write!(f, "FailedToPlay"),
            Self::CustomDataNotSet => write!(f, "CustomDataNotSet"),
        }
    }
}

/// Phase stream for a single presentation attempt.
///
/// The stream yields phases in order and closes after the terminal phase.
/// A request rejected by a gate check yields no phases at all: the stream
/// closes immediately.
pub struct PresentationStream {
    rx: mpsc::Receiver<PresentationState>,
}

impl PresentationStream {
    /// Creates a stream together with the sender that feeds it.
    pub(crate) fn channel(capacity: usize) -> (mpsc::Sender<PresentationState>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }

    /// A stream that completes immediately with zero phases.
    pub fn empty() -> Self {
        let (_tx, rx) = mpsc::channel(1);
        Self { rx }
    }

    /// Receives the next phase, or `None` once the attempt is over.
    pub async fn next(&mut self) -> Option<PresentationState> {
        self.rx.recv().await
    }

    /// Drains the stream to completion and returns every phase in order.
    pub async fn collect(mut self) -> Vec<PresentationState> {
        let mut phases = Vec::new();
        while let Some(phase) = self.next().await {
            phases.push(phase);
        }
        phases
    }
}

impl fmt::Debug for PresentationStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentationStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_display_and_eq() {
        let a = AdUnitTag::new("UntunneledInterstitial");
        let b = AdUnitTag::from("UntunneledInterstitial");
        assert_eq!(a, b);
        assert_eq!(format!("{}", a), "UntunneledInterstitial");
        assert_eq!(a.as_str(), "UntunneledInterstitial");
    }

    #[test]
    fn test_phase_is_terminal() {
        assert!(!PresentationState::WillAppear.is_terminal());
        assert!(!PresentationState::DidAppear.is_terminal());
        assert!(!PresentationState::WillDisappear.is_terminal());
        assert!(PresentationState::DidDisappear.is_terminal());
        assert!(PresentationState::InappropriateState.is_terminal());
        assert!(PresentationState::NoAdsLoaded.is_terminal());
        assert!(PresentationState::FailedToPlay.is_terminal());
        assert!(PresentationState::CustomDataNotSet.is_terminal());
    }

    #[test]
    fn test_phase_is_error() {
        assert!(!PresentationState::DidDisappear.is_error());
        assert!(PresentationState::NoAdsLoaded.is_error());
        assert!(PresentationState::FailedToPlay.is_error());
        assert!(PresentationState::CustomDataNotSet.is_error());
        assert!(PresentationState::InappropriateState.is_error());
    }

    #[tokio::test]
    async fn test_empty_stream_yields_no_phases() {
        let stream = PresentationStream::empty();
        assert_eq!(stream.collect().await, Vec::new());
    }

    #[tokio::test]
    async fn test_stream_yields_phases_in_order() {
        let (tx, stream) = PresentationStream::channel(PHASE_CHANNEL_CAPACITY);
        tx.try_send(PresentationState::WillAppear).unwrap();
        tx.try_send(PresentationState::DidAppear).unwrap();
        drop(tx);

        assert_eq!(
            stream.collect().await,
            vec![PresentationState::WillAppear, PresentationState::DidAppear]
        );
    }
}
