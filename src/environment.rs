//! App and network state supplied by the host.
//!
//! The core only consumes these values as read-only gate inputs: the host
//! publishes through an [`EnvironmentHandle`], the manager holds the
//! corresponding [`EnvironmentFeed`] and reads the latest snapshot at
//! every gate check and signal recomputation.

use std::fmt;

use tokio::sync::watch;

/// Network tunneling mode reported by the tunnel-state collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TunnelMode {
    /// Traffic is routed through the tunnel.
    Tunneled,
    /// Traffic bypasses the tunnel.
    #[default]
    Untunneled,
}

impl fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tunneled => write!(f, "Tunneled"),
            Self::Untunneled => write!(f, "Untunneled"),
        }
    }
}

/// Snapshot of the app/network state relevant to ad gating.
///
/// The default snapshot is background and untunneled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct AppEnvironment {
    /// Whether the app is in the foreground and in a presentable state.
    pub foreground: bool,
    /// Current network tunneling mode.
    pub tunnel_mode: TunnelMode,
}

/// Receiver side of the environment channel, consumed by the core.
///
/// `borrow()` always yields the latest snapshot; `changed()` resolves on
/// every distinct update.
pub type EnvironmentFeed = watch::Receiver<AppEnvironment>;

/// Host-facing publisher of app/network state.
///
/// Setters deduplicate: publishing an unchanged value does not notify
/// subscribers.
#[derive(Debug)]
pub struct EnvironmentHandle {
    tx: watch::Sender<AppEnvironment>,
}

impl EnvironmentHandle {
    /// Creates a handle and its feed, starting from the default snapshot
    /// (background, untunneled).
    pub fn new() -> (Self, EnvironmentFeed) {
        Self::with_initial(AppEnvironment::default())
    }

    /// Creates a handle and its feed with a given initial snapshot.
    pub fn with_initial(initial: AppEnvironment) -> (Self, EnvironmentFeed) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, rx)
    }

    /// Publishes a complete snapshot.
    pub fn set(&self, env: AppEnvironment) {
        self.tx.send_if_modified(|current| {
            if *current != env {
                *current = env;
                true
            } else {
                false
            }
        });
    }

    /// Updates the foreground flag.
    pub fn set_foreground(&self, foreground: bool) {
        self.tx.send_if_modified(|current| {
            if current.foreground != foreground {
                current.foreground = foreground;
                true
            } else {
                false
            }
        });
    }

    /// Updates the tunneling mode.
    pub fn set_tunnel_mode(&self, tunnel_mode: TunnelMode) {
        self.tx.send_if_modified(|current| {
            if current.tunnel_mode != tunnel_mode {
                current.tunnel_mode = tunnel_mode;
                true
            } else {
                false
            }
        });
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> AppEnvironment {
        *self.tx.borrow()
    }

    /// Subscribes another feed to this handle.
    pub fn subscribe(&self) -> EnvironmentFeed {
        self.tx.subscribe()
    }
}
