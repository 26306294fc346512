//! Error types for adapter load and show operations.
//!
//! Load errors are consumed by the retry controller and never surface to
//! presentation callers; presentation failures travel in-band as terminal
//! phases instead.

use thiserror::Error;

/// Terminal outcomes of a failed load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoadError {
    /// A previously loaded ad went stale before it could be presented.
    ///
    /// Expiry is routine provider churn: the retry controller reloads
    /// unconditionally on this error.
    #[error("loaded ad expired before presentation")]
    Expired,

    /// The load attempt itself failed.
    ///
    /// Retried a bounded number of times before readiness settles at false.
    #[error("ad failed to load")]
    FailedToLoad,
}

/// Rejection of a raw SDK show call.
///
/// Surfaces to presentation callers as a single `FailedToPlay` phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShowError {
    /// The provider has no ad to show.
    #[error("no ad is loaded")]
    NotLoaded,

    /// Playback could not be started.
    #[error("playback could not be started: {0}")]
    Playback(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        assert_eq!(
            format!("{}", LoadError::Expired),
            "loaded ad expired before presentation"
        );
        assert_eq!(format!("{}", LoadError::FailedToLoad), "ad failed to load");
    }

    #[test]
    fn test_show_error_display() {
        let err = ShowError::Playback("network stall".to_string());
        assert_eq!(
            format!("{}", err),
            "playback could not be started: network stall"
        );
    }
}
