use super::*;
use crate::{
    backend::{BackendError, ReliefBackend},
    render::RecordingSurface,
};
use async_trait::async_trait;
use shared::{
    domain::{CampIndex, DeviceId, Emergency, ReliefCamp},
    protocol::EmergencyReport,
};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct CountingBackend {
    emergency_fetches: AtomicUsize,
    camp_fetches: AtomicUsize,
}

#[async_trait]
impl ReliefBackend for CountingBackend {
    async fn fetch_emergencies(
        &self,
        _identity: Option<&DeviceId>,
    ) -> Result<Vec<Emergency>, BackendError> {
        self.emergency_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn fetch_relief_camps(&self) -> Result<Vec<ReliefCamp>, BackendError> {
        self.camp_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(vec![ReliefCamp::new(19.0, 72.0, "School")])
    }

    async fn remove_emergency(&self, _id: &DeviceId) -> Result<(), BackendError> {
        Ok(())
    }

    async fn remove_relief_camp(&self, _index: CampIndex) -> Result<(), BackendError> {
        Ok(())
    }

    async fn add_relief_camp(
        &self,
        _lat: f64,
        _lng: f64,
        _name: &str,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn submit_emergency(&self, _report: &EmergencyReport) -> Result<(), BackendError> {
        Ok(())
    }
}

fn engine_with(backend: Arc<CountingBackend>) -> Arc<ReliefEngine> {
    ReliefEngine::new(backend, Arc::new(RecordingSurface::new()))
}

#[tokio::test(start_paused = true)]
async fn first_tick_is_immediate_then_fixed_period() {
    let backend = Arc::new(CountingBackend::default());
    let handle = PollLoop::new(engine_with(backend.clone())).spawn();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.emergency_fetches.load(Ordering::SeqCst), 1);

    tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2).await;
    assert_eq!(backend.emergency_fetches.load(Ordering::SeqCst), 3);
    assert_eq!(backend.camp_fetches.load(Ordering::SeqCst), 0);

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn camps_are_polled_when_enabled() {
    let backend = Arc::new(CountingBackend::default());
    let engine = engine_with(backend.clone());
    let handle = PollLoop::new(engine.clone())
        .with_period(Duration::from_millis(500))
        .with_camps(true)
        .spawn();

    tokio::time::sleep(Duration::from_millis(1_010)).await;
    assert_eq!(backend.camp_fetches.load(Ordering::SeqCst), 3);
    assert_eq!(engine.camps().await.len(), 1);

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn aborting_stops_the_loop() {
    let backend = Arc::new(CountingBackend::default());
    let handle = PollLoop::new(engine_with(backend.clone()))
        .with_period(Duration::from_millis(100))
        .spawn();

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.abort();
    let _ = handle.await;
    let seen = backend.emergency_fetches.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.emergency_fetches.load(Ordering::SeqCst), seen);
}

#[test]
fn zero_period_is_clamped() {
    let backend = Arc::new(CountingBackend::default());
    let poll = PollLoop::new(engine_with(backend)).with_period(Duration::ZERO);
    assert_eq!(poll.period(), Duration::from_millis(1));
}
