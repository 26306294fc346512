//! Integration tests for the adapter and load-retry layers.
//!
//! These tests verify the complete adapter workflow including:
//! - Load, unload, and readiness postconditions
//! - No duplicate readiness notifications
//! - Presentation phase ordering and terminal error phases
//! - Load retry and expiry recovery through the controller

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use admux::adapter::{
    AdSdk, AdUnitAdapter, AdUnitTag, LoadError, PresentationState, PresentationSurface,
    SdkAdUnit, SdkEvent, ShowError,
};
use admux::retry::{LoadController, LoadResult, RetryPolicy};

// =============================================================================
// Test Helpers
// =============================================================================

struct TestSurface;

impl PresentationSurface for TestSurface {}

/// Scripted provider SDK. `start_load` pops the next outcome from the
/// script (default `Loaded`); `show` plays the canonical phase sequence.
struct ScriptedSdk {
    events: broadcast::Sender<SdkEvent>,
    script: Mutex<VecDeque<SdkEvent>>,
    load_calls: AtomicUsize,
}

impl ScriptedSdk {
    fn new(script: impl IntoIterator<Item = SdkEvent>) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            events,
            script: Mutex::new(script.into_iter().collect()),
            load_calls: AtomicUsize::new(0),
        })
    }

    fn emit(&self, event: SdkEvent) {
        let _ = self.events.send(event);
    }

    fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }
}

impl AdSdk for ScriptedSdk {
    fn start_load(&self) {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SdkEvent::Loaded);
        let _ = self.events.send(outcome);
    }

    fn discard(&self) {}

    fn show(
        &self,
        _surface: &dyn PresentationSurface,
        _custom_data: Option<&str>,
    ) -> Result<(), ShowError> {
        for event in [
            SdkEvent::WillAppear,
            SdkEvent::DidAppear,
            SdkEvent::WillDisappear,
            SdkEvent::DidDisappear,
        ] {
            let _ = self.events.send(event);
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<SdkEvent> {
        self.events.subscribe()
    }
}

fn test_tag() -> AdUnitTag {
    AdUnitTag::new("UntunneledInterstitial")
}

async fn wait_ready(adapter: &dyn AdUnitAdapter, expected: bool) {
    let mut rx = adapter.readiness();
    timeout(Duration::from_secs(2), async {
        while *rx.borrow() != expected {
            rx.changed().await.expect("readiness channel closed");
        }
    })
    .await
    .expect("readiness never reached expected value");
}

// =============================================================================
// Integration Tests
// =============================================================================

#[tokio::test]
async fn test_full_lifecycle_load_present_reload_unload() {
    let sdk = ScriptedSdk::new([]);
    let adapter = SdkAdUnit::new(test_tag(), Arc::clone(&sdk));

    // Load: readiness becomes true.
    adapter.load_ad().await.expect("load should succeed");
    wait_ready(&adapter, true).await;

    // Present: canonical sequence, then the ad is consumed.
    let phases = adapter
        .present_ad(Arc::new(TestSurface), None)
        .collect()
        .await;
    assert_eq!(
        phases,
        vec![
            PresentationState::WillAppear,
            PresentationState::DidAppear,
            PresentationState::WillDisappear,
            PresentationState::DidDisappear,
        ]
    );
    wait_ready(&adapter, false).await;

    // Reload and unload: postcondition ready == false.
    adapter.load_ad().await.expect("reload should succeed");
    wait_ready(&adapter, true).await;
    let tag = adapter.unload_ad().await;
    assert_eq!(tag, test_tag());
    assert!(!adapter.is_ready());
    assert_eq!(sdk.load_calls(), 2);
}

#[tokio::test]
async fn test_readiness_observes_each_transition_exactly_once() {
    let sdk = ScriptedSdk::new([]);
    let adapter = SdkAdUnit::new(test_tag(), Arc::clone(&sdk));
    let mut rx = adapter.readiness();
    assert!(!*rx.borrow_and_update());

    adapter.load_ad().await.expect("load");
    wait_ready(&adapter, true).await;
    adapter
        .present_ad(Arc::new(TestSurface), None)
        .collect()
        .await;
    wait_ready(&adapter, false).await;

    // The observer sees exactly the two real transitions: true, false.
    let mut observed = Vec::new();
    while rx.has_changed().expect("readiness channel closed") {
        observed.push(*rx.borrow_and_update());
    }
    assert_eq!(observed, vec![true, false]);
}

#[tokio::test]
async fn test_phase_stream_is_prefix_or_single_error() {
    // Unready adapter: exactly one error phase.
    let sdk = ScriptedSdk::new([SdkEvent::LoadFailed]);
    let adapter = SdkAdUnit::new(test_tag(), Arc::clone(&sdk));

    let phases = adapter
        .present_ad(Arc::new(TestSurface), None)
        .collect()
        .await;
    assert_eq!(phases, vec![PresentationState::NoAdsLoaded]);
    assert!(phases[0].is_error());

    // Ready adapter: the full canonical prefix, no error mixed in.
    let _ = adapter.load_ad().await; // consumes the scripted failure
    adapter.load_ad().await.expect("second load succeeds");
    wait_ready(&adapter, true).await;
    let phases = adapter
        .present_ad(Arc::new(TestSurface), None)
        .collect()
        .await;
    assert!(phases.iter().all(|p| !p.is_error()));
    assert_eq!(phases.last(), Some(&PresentationState::DidDisappear));
}

#[tokio::test]
async fn test_controller_recovers_failures_within_budget() {
    // GIVEN: an SDK that fails twice before loading
    let sdk = ScriptedSdk::new([SdkEvent::LoadFailed, SdkEvent::LoadFailed]);
    let adapter: Arc<dyn AdUnitAdapter> =
        Arc::new(SdkAdUnit::new(test_tag(), Arc::clone(&sdk)));
    let controller = LoadController::new(RetryPolicy::default().with_load_retry_count(3));

    // WHEN: a load cycle runs
    let result = controller.load(Arc::clone(&adapter)).await;

    // THEN: the failures stay internal and the ad ends up loaded
    assert!(result.is_loaded());
    assert_eq!(sdk.load_calls(), 3);
    wait_ready(adapter.as_ref(), true).await;
}

#[tokio::test]
async fn test_controller_surfaces_exhaustion_once() {
    let sdk = ScriptedSdk::new([
        SdkEvent::LoadFailed,
        SdkEvent::LoadFailed,
        SdkEvent::LoadFailed,
    ]);
    let adapter: Arc<dyn AdUnitAdapter> =
        Arc::new(SdkAdUnit::new(test_tag(), Arc::clone(&sdk)));
    let controller = LoadController::new(RetryPolicy::default().with_load_retry_count(3));

    let result = controller.load(Arc::clone(&adapter)).await;
    assert_eq!(
        result,
        LoadResult::RetriesExhausted {
            tag: test_tag(),
            last_error: LoadError::FailedToLoad,
        }
    );
    assert_eq!(sdk.load_calls(), 3, "no attempts beyond the budget");
    assert!(!adapter.is_ready());
}

#[tokio::test]
async fn test_controller_reloads_after_expiry() {
    // Expiry terminates the in-flight load; the controller reattempts
    // without consuming the failure budget.
    let sdk = ScriptedSdk::new([SdkEvent::Expired, SdkEvent::Expired]);
    let adapter: Arc<dyn AdUnitAdapter> =
        Arc::new(SdkAdUnit::new(test_tag(), Arc::clone(&sdk)));
    let controller = LoadController::new(RetryPolicy::default().with_load_retry_count(1));

    let result = controller.load(Arc::clone(&adapter)).await;
    assert!(result.is_loaded());
    assert_eq!(sdk.load_calls(), 3);
}

#[tokio::test]
async fn test_expiry_while_idle_drops_readiness_for_observers() {
    let sdk = ScriptedSdk::new([]);
    let adapter = SdkAdUnit::new(test_tag(), Arc::clone(&sdk));

    adapter.load_ad().await.expect("load");
    wait_ready(&adapter, true).await;

    sdk.emit(SdkEvent::Expired);
    wait_ready(&adapter, false).await;
}
