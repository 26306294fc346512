//! Ad unit adapter contract and the SDK-backed driver implementation.
//!
//! An adapter wraps one provider SDK ad unit (one provider/category/
//! tunneling-variant combination) behind the [`AdUnitAdapter`] capability
//! contract: a readiness flag, de-duplicated load/unload operations, and
//! ordered presentation phase streams. The rest of the crate only ever
//! talks to adapters through the contract.

mod contract;
mod error;
mod sdk;
mod types;
mod unit;

pub use contract::{AdUnitAdapter, AdapterFuture, PresentationSurface};
pub use error::{LoadError, ShowError};
pub use sdk::{AdSdk, SdkEvent};
pub use types::{AdUnitTag, PresentationState, PresentationStream};
pub use unit::{AdapterConfig, SdkAdUnit, DEFAULT_COMMAND_CAPACITY, DEFAULT_EVENT_CAPACITY};

pub(crate) use types::PHASE_CHANNEL_CAPACITY;
