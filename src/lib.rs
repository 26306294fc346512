//! admux - advertisement unit lifecycle coordination
//!
//! This library coordinates the lifecycle of in-app advertisement units
//! (interstitial and rewarded video, each in tunneled and untunneled
//! network variants). It keeps ads loaded through retry and expiry churn,
//! folds per-provider readiness into category-level can-present signals,
//! and turns presentation requests into a canonical ordered phase stream.
//!
//! # High-Level API
//!
//! The [`manager`] module provides the orchestrator most hosts use:
//!
//! ```ignore
//! use admux::manager::{AdManager, ManagerConfig, UNTUNNELED_INTERSTITIAL};
//! use admux::environment::{AppEnvironment, EnvironmentHandle, TunnelMode};
//!
//! let (env, feed) = EnvironmentHandle::new();
//! let manager = AdManager::new(interstitial_adapters, rewarded_adapters, feed, ManagerConfig::default());
//! manager.initialize();
//!
//! // Present an interstitial and observe its phases
//! let mut phases = manager.present_interstitial(surface);
//! while let Some(phase) = phases.next().await {
//!     println!("{phase}");
//! }
//! ```

pub mod adapter;
pub mod category;
pub mod environment;
pub mod logging;
pub mod manager;
pub mod retry;

/// Version of the admux library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
