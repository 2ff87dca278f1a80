use super::*;
use crate::{
    backend::BackendError,
    filter::SortDirection,
    render::{CircleColor, CircleSpec, LayerId, MarkerSpec, MarkerStyle, RecordingSurface},
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use shared::{
    domain::{Gender, DEFAULT_CAMP_NAME},
    protocol::ReportStatus,
};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize},
    Mutex as StdMutex,
};
use tokio::sync::{broadcast::error::TryRecvError, Notify};

#[derive(Default)]
struct ScriptedBackend {
    emergencies: StdMutex<Vec<Emergency>>,
    camps: StdMutex<Vec<ReliefCamp>>,
    fail_fetch: AtomicBool,
    reject_camp_removal: AtomicBool,
    fetch_calls: AtomicUsize,
    identity_queries: StdMutex<Vec<Option<DeviceId>>>,
    removed: StdMutex<Vec<DeviceId>>,
    added_camps: StdMutex<Vec<String>>,
    reports: StdMutex<Vec<ReportStatus>>,
    gate: Option<Arc<Notify>>,
    entered: Arc<Notify>,
    /// Held by the next camp fetch only.
    camp_gate: StdMutex<Option<Arc<Notify>>>,
    camp_entered: Arc<Notify>,
}

impl ScriptedBackend {
    fn with(emergencies: Vec<Emergency>) -> Self {
        Self {
            emergencies: StdMutex::new(emergencies),
            ..Self::default()
        }
    }

    fn set_emergencies(&self, emergencies: Vec<Emergency>) {
        *self.emergencies.lock().unwrap() = emergencies;
    }

    fn set_camps(&self, camps: Vec<ReliefCamp>) {
        *self.camps.lock().unwrap() = camps;
    }
}

#[async_trait]
impl ReliefBackend for ScriptedBackend {
    async fn fetch_emergencies(
        &self,
        identity: Option<&DeviceId>,
    ) -> Result<Vec<Emergency>, BackendError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.identity_queries
            .lock()
            .unwrap()
            .push(identity.cloned());
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(BackendError::Network("connection reset".into()));
        }
        Ok(self.emergencies.lock().unwrap().clone())
    }

    async fn fetch_relief_camps(&self) -> Result<Vec<ReliefCamp>, BackendError> {
        let camps = self.camps.lock().unwrap().clone();
        let gate = self.camp_gate.lock().unwrap().take();
        self.camp_entered.notify_one();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(camps)
    }

    async fn remove_emergency(&self, id: &DeviceId) -> Result<(), BackendError> {
        self.removed.lock().unwrap().push(id.clone());
        self.emergencies
            .lock()
            .unwrap()
            .retain(|emergency| &emergency.device_id != id);
        Ok(())
    }

    async fn remove_relief_camp(&self, index: CampIndex) -> Result<(), BackendError> {
        if self.reject_camp_removal.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected {
                status: 400,
                message: "Invalid camp index".into(),
            });
        }
        let mut camps = self.camps.lock().unwrap();
        if index.0 < camps.len() {
            camps.remove(index.0);
        }
        Ok(())
    }

    async fn add_relief_camp(&self, lat: f64, lng: f64, name: &str) -> Result<(), BackendError> {
        self.added_camps.lock().unwrap().push(name.to_string());
        self.camps
            .lock()
            .unwrap()
            .push(ReliefCamp::new(lat, lng, name));
        Ok(())
    }

    async fn submit_emergency(&self, report: &EmergencyReport) -> Result<(), BackendError> {
        self.reports.lock().unwrap().push(report.status);
        let mut emergencies = self.emergencies.lock().unwrap();
        emergencies.retain(|emergency| emergency.device_id != report.emergency.device_id);
        if report.status != ReportStatus::Clear {
            emergencies.push(report.emergency.clone());
        }
        Ok(())
    }
}

/// Recording surface that can be told to refuse new markers.
#[derive(Default)]
struct RefusingSurface {
    inner: RecordingSurface,
    refuse_markers: AtomicBool,
}

impl RenderSurface for RefusingSurface {
    fn create_marker(&self, spec: MarkerSpec) -> Result<LayerId, RenderError> {
        if self.refuse_markers.load(Ordering::SeqCst) {
            return Err(RenderError::Unavailable("marker refused".into()));
        }
        self.inner.create_marker(spec)
    }

    fn create_circle(&self, spec: CircleSpec) -> Result<LayerId, RenderError> {
        self.inner.create_circle(spec)
    }

    fn move_layer(&self, layer: LayerId, position: LatLng) -> Result<(), RenderError> {
        self.inner.move_layer(layer, position)
    }

    fn set_marker_style(&self, layer: LayerId, style: MarkerStyle) -> Result<(), RenderError> {
        self.inner.set_marker_style(layer, style)
    }

    fn set_popup(&self, layer: LayerId, popup: &str) -> Result<(), RenderError> {
        self.inner.set_popup(layer, popup)
    }

    fn set_circle(
        &self,
        layer: LayerId,
        radius_m: f64,
        color: CircleColor,
    ) -> Result<(), RenderError> {
        self.inner.set_circle(layer, radius_m, color)
    }

    fn set_visible(&self, layer: LayerId, visible: bool) -> Result<(), RenderError> {
        self.inner.set_visible(layer, visible)
    }

    fn destroy(&self, layer: LayerId) -> Result<(), RenderError> {
        self.inner.destroy(layer)
    }
}

fn emergency(id: &str, gender: Gender, age: u32, lat: f64, lon: f64) -> Emergency {
    Emergency {
        device_id: DeviceId::new(id),
        name: format!("person {id}"),
        gender,
        age,
        lat,
        lon,
        accuracy: 20.0,
        is_manual: false,
        timestamp: Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap(),
    }
}

fn setup(
    backend: ScriptedBackend,
) -> (Arc<ReliefEngine>, Arc<ScriptedBackend>, Arc<RecordingSurface>) {
    let backend = Arc::new(backend);
    let surface = Arc::new(RecordingSurface::new());
    let engine = ReliefEngine::new(backend.clone(), surface.clone());
    (engine, backend, surface)
}

fn drain(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => out.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}

fn entry_ids(entries: &[ListEntry]) -> Vec<&str> {
    entries
        .iter()
        .map(|entry| entry.emergency.device_id.as_str())
        .collect()
}

async fn marker_visible(
    engine: &ReliefEngine,
    surface: &RecordingSurface,
    id: &str,
) -> Option<bool> {
    let state = engine.state.lock().await;
    let marker = state.emergencies.representation(&DeviceId::new(id))?.marker;
    surface.layer(marker).map(|layer| layer.visible)
}

#[tokio::test]
async fn refresh_applies_snapshot_and_publishes_entries() {
    let (engine, _backend, surface) = setup(ScriptedBackend::with(vec![
        emergency("a", Gender::Male, 30, 19.0, 72.0),
        emergency("b", Gender::Female, 25, 19.1, 72.1),
    ]));
    let mut events = engine.subscribe_events();

    let outcome = engine.refresh().await.expect("refresh");
    assert_eq!(outcome, RefreshOutcome::Applied { active_count: 2 });
    // two markers and two accuracy circles
    assert_eq!(surface.live_layers(), 4);

    let events = drain(&mut events);
    match events.as_slice() {
        [EngineEvent::SnapshotApplied {
            entries,
            active_count,
        }] => {
            assert_eq!(*active_count, 2);
            assert_eq!(entry_ids(entries), vec!["a", "b"]);
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test]
async fn overlapping_refresh_is_skipped_without_side_effects() {
    let gate = Arc::new(Notify::new());
    let backend = ScriptedBackend {
        gate: Some(gate.clone()),
        ..ScriptedBackend::with(vec![emergency("a", Gender::Male, 30, 19.0, 72.0)])
    };
    let (engine, backend, surface) = setup(backend);

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.refresh().await }
    });
    backend.entered.notified().await;

    let second = engine.refresh().await.expect("second refresh");
    assert_eq!(second, RefreshOutcome::Skipped);
    assert_eq!(backend.fetch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(surface.live_layers(), 0);
    assert!(engine.emergencies().await.is_empty());

    gate.notify_one();
    let first = first.await.expect("join").expect("first refresh");
    assert_eq!(first, RefreshOutcome::Applied { active_count: 1 });
    assert_eq!(engine.emergencies().await.len(), 1);

    // the guard is released once the first cycle finishes
    gate.notify_one();
    assert!(matches!(
        engine.refresh().await.expect("third refresh"),
        RefreshOutcome::Applied { .. }
    ));
}

#[tokio::test]
async fn failed_fetch_leaves_state_untouched_and_reports_error() {
    let (engine, backend, surface) = setup(ScriptedBackend::with(vec![emergency(
        "a",
        Gender::Male,
        30,
        19.0,
        72.0,
    )]));
    engine.refresh().await.expect("first refresh");
    let stats = surface.stats();
    let mut events = engine.subscribe_events();

    backend.fail_fetch.store(true, Ordering::SeqCst);
    backend.set_emergencies(Vec::new());
    let err = engine.refresh().await.expect_err("fetch fails");
    assert!(matches!(err, EngineError::Backend(BackendError::Network(_))));

    assert_eq!(engine.emergencies().await.len(), 1);
    assert_eq!(surface.stats(), stats);
    let events = drain(&mut events);
    assert!(
        matches!(events.as_slice(), [EngineEvent::Error(message)] if message == LOAD_ERROR),
        "{events:?}"
    );
}

#[tokio::test]
async fn render_failure_keeps_previous_snapshot() {
    let backend = Arc::new(ScriptedBackend::with(vec![
        emergency("a", Gender::Male, 30, 19.0, 72.0),
        emergency("b", Gender::Female, 25, 19.1, 72.1),
    ]));
    let surface = Arc::new(RefusingSurface::default());
    let engine = ReliefEngine::new(backend.clone(), surface.clone());
    engine.refresh().await.expect("first refresh");
    engine
        .select_emergency(&DeviceId::new("a"))
        .await
        .expect("select");

    let mut events = engine.subscribe_events();
    backend.set_emergencies(vec![
        emergency("b", Gender::Female, 25, 19.1, 72.1),
        emergency("c", Gender::Male, 40, 19.2, 72.2),
    ]);
    surface.refuse_markers.store(true, Ordering::SeqCst);
    let err = engine.refresh().await.expect_err("c cannot be drawn");
    assert!(matches!(err, EngineError::Render(_)));

    let ids: Vec<DeviceId> = engine
        .emergencies()
        .await
        .into_iter()
        .map(|emergency| emergency.device_id)
        .collect();
    assert_eq!(ids, vec![DeviceId::new("a"), DeviceId::new("b")]);
    assert_eq!(surface.inner.live_layers(), 4);
    assert_eq!(
        engine.selection().await,
        Selection::Emergency(DeviceId::new("a"))
    );
    let events = drain(&mut events);
    assert!(
        matches!(events.as_slice(), [EngineEvent::Error(_)]),
        "{events:?}"
    );

    surface.refuse_markers.store(false, Ordering::SeqCst);
    assert_eq!(
        engine.refresh().await.expect("retry"),
        RefreshOutcome::Applied { active_count: 2 }
    );
    assert_eq!(engine.selection().await, Selection::None);
}

#[tokio::test]
async fn attribute_filter_hides_excluded_markers() {
    let (engine, _backend, surface) = setup(ScriptedBackend::with(vec![
        emergency("teen", Gender::Female, 17, 19.0, 72.0),
        emergency("adult", Gender::Female, 30, 19.0, 72.0),
        emergency("man", Gender::Male, 30, 19.0, 72.0),
    ]));
    engine
        .set_filter(ViewFilter {
            gender: Some(Gender::Female),
            min_age: Some(18),
            max_age: Some(60),
            ..ViewFilter::default()
        })
        .await
        .expect("set filter");

    engine.refresh().await.expect("refresh");
    let entries = engine.republish().await.expect("republish");
    assert_eq!(entry_ids(&entries), vec!["adult"]);

    assert_eq!(marker_visible(&engine, &surface, "adult").await, Some(true));
    assert_eq!(marker_visible(&engine, &surface, "teen").await, Some(false));
    assert_eq!(marker_visible(&engine, &surface, "man").await, Some(false));
}

#[tokio::test]
async fn identity_filter_restricts_fetch_and_visibility() {
    let (engine, backend, surface) = setup(ScriptedBackend::with(vec![
        emergency("a", Gender::Male, 30, 19.0, 72.0),
        emergency("b", Gender::Female, 25, 19.1, 72.1),
    ]));
    engine.refresh().await.expect("refresh");

    // switching the identity hides the others before the next fetch
    let entries = engine
        .set_filter(ViewFilter::for_identity(DeviceId::new("b")))
        .await
        .expect("set identity");
    assert_eq!(entry_ids(&entries), vec!["b"]);
    assert_eq!(marker_visible(&engine, &surface, "a").await, Some(false));
    assert_eq!(engine.emergencies().await.len(), 2);

    // the backend ignores the query here; the client still filters
    let outcome = engine.refresh().await.expect("refresh with identity");
    assert_eq!(outcome, RefreshOutcome::Applied { active_count: 1 });
    assert_eq!(
        backend.identity_queries.lock().unwrap().last().cloned(),
        Some(Some(DeviceId::new("b")))
    );
    let tracked = engine.emergencies().await;
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].device_id, DeviceId::new("b"));
}

#[tokio::test]
async fn reference_point_republishes_sorted_with_distances() {
    let (engine, _backend, _surface) = setup(ScriptedBackend::with(vec![
        emergency("far", Gender::Male, 30, 0.0, 0.5),
        emergency("near", Gender::Male, 30, 0.0, 0.001),
        emergency("mid", Gender::Male, 30, 0.0, 0.05),
    ]));
    engine.refresh().await.expect("refresh");
    engine
        .set_filter(ViewFilter {
            distance_sort: Some(SortDirection::Asc),
            ..ViewFilter::default()
        })
        .await
        .expect("sort");

    let mut events = engine.subscribe_events();
    let entries = engine
        .set_reference_point(Some(LatLng::new(0.0, 0.0)))
        .await
        .expect("reference");
    assert_eq!(entry_ids(&entries), vec!["near", "mid", "far"]);
    assert_eq!(entries[0].distance_label.as_deref(), Some("111 m away"));
    assert!(matches!(
        drain(&mut events).as_slice(),
        [EngineEvent::SnapshotApplied { active_count: 3, .. }]
    ));
}

#[tokio::test]
async fn selected_emergency_vanishing_clears_selection() {
    let (engine, backend, surface) = setup(ScriptedBackend::with(vec![
        emergency("a", Gender::Male, 30, 19.0, 72.0),
        emergency("b", Gender::Female, 25, 19.1, 72.1),
    ]));
    engine.refresh().await.expect("refresh");
    assert!(engine
        .select_emergency(&DeviceId::new("a"))
        .await
        .expect("select"));

    let mut events = engine.subscribe_events();
    backend.set_emergencies(vec![emergency("b", Gender::Female, 25, 19.1, 72.1)]);
    engine.refresh().await.expect("refresh");

    assert_eq!(engine.selection().await, Selection::None);
    assert!(surface.selected_markers().is_empty());
    let events = drain(&mut events);
    assert!(matches!(
        events.first(),
        Some(EngineEvent::SelectionChanged(Selection::None))
    ));
}

#[tokio::test]
async fn selection_survives_updates_of_the_selected_entity() {
    let (engine, backend, surface) = setup(ScriptedBackend::with(vec![emergency(
        "a",
        Gender::Male,
        30,
        19.0,
        72.0,
    )]));
    engine.refresh().await.expect("refresh");
    engine
        .select_emergency(&DeviceId::new("a"))
        .await
        .expect("select");

    backend.set_emergencies(vec![emergency("a", Gender::Male, 31, 19.2, 72.2)]);
    engine.refresh().await.expect("refresh");

    let marker = {
        let state = engine.state.lock().await;
        state
            .emergencies
            .representation(&DeviceId::new("a"))
            .expect("a")
            .marker
    };
    assert_eq!(
        surface.marker_style(marker),
        Some(MarkerStyle::SelectedEmergency)
    );
    assert_eq!(
        engine.selection().await,
        Selection::Emergency(DeviceId::new("a"))
    );
}

#[tokio::test]
async fn remove_selected_emergency_purges_and_refreshes() {
    let (engine, backend, surface) = setup(ScriptedBackend::with(vec![
        emergency("a", Gender::Male, 30, 19.0, 72.0),
        emergency("b", Gender::Female, 25, 19.1, 72.1),
    ]));
    engine.refresh().await.expect("refresh");
    engine
        .select_emergency(&DeviceId::new("a"))
        .await
        .expect("select");

    engine.remove_selected().await.expect("remove");
    assert_eq!(*backend.removed.lock().unwrap(), vec![DeviceId::new("a")]);
    assert_eq!(engine.selection().await, Selection::None);
    let tracked = engine.emergencies().await;
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].device_id, DeviceId::new("b"));
    assert_eq!(surface.live_layers(), 2);
}

#[tokio::test]
async fn remove_selected_without_selection_is_refused() {
    let (engine, backend, _surface) = setup(ScriptedBackend::default());
    let err = engine.remove_selected().await.expect_err("nothing selected");
    assert!(matches!(err, EngineError::NothingSelected));
    assert!(backend.removed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn camp_lifecycle_through_the_backend() {
    let (engine, backend, surface) = setup(ScriptedBackend::default());
    backend.set_camps(vec![ReliefCamp::new(19.0, 72.0, "School")]);
    engine.refresh_camps().await.expect("camps");

    engine
        .add_relief_camp(19.5, 72.5, Some("   "))
        .await
        .expect("add camp");
    assert_eq!(
        *backend.added_camps.lock().unwrap(),
        vec![DEFAULT_CAMP_NAME.to_string()]
    );
    assert_eq!(engine.camps().await.len(), 2);

    assert!(engine.select_camp(CampIndex(1)).await.expect("select"));
    engine.remove_selected().await.expect("remove camp");
    let camps = engine.camps().await;
    assert_eq!(camps.len(), 1);
    assert_eq!(camps[0].name, "School");
    assert_eq!(engine.selection().await, Selection::None);
    assert_eq!(surface.live_layers(), 1);
}

#[tokio::test]
async fn stale_camp_removal_refetches_without_error() {
    let (engine, backend, _surface) = setup(ScriptedBackend::default());
    backend.set_camps(vec![ReliefCamp::new(19.0, 72.0, "School")]);
    engine.refresh_camps().await.expect("camps");
    backend.reject_camp_removal.store(true, Ordering::SeqCst);

    let mut events = engine.subscribe_events();
    engine
        .remove_camp(CampIndex(4))
        .await
        .expect("stale index is not an error");
    let events = drain(&mut events);
    assert!(events
        .iter()
        .all(|event| !matches!(event, EngineEvent::Error(_))));
    assert!(events
        .iter()
        .any(|event| matches!(event, EngineEvent::CampsApplied { camps } if camps.len() == 1)));
}

#[tokio::test]
async fn slow_camp_fetch_does_not_overwrite_newer_camps() {
    let (engine, backend, surface) = setup(ScriptedBackend::default());
    backend.set_camps(vec![ReliefCamp::new(19.0, 72.0, "old")]);
    let gate = Arc::new(Notify::new());
    *backend.camp_gate.lock().unwrap() = Some(gate.clone());

    let slow = tokio::spawn({
        let engine = engine.clone();
        async move { engine.refresh_camps().await }
    });
    backend.camp_entered.notified().await;

    backend.set_camps(vec![
        ReliefCamp::new(19.0, 72.0, "School"),
        ReliefCamp::new(19.1, 72.1, "Temple"),
    ]);
    let fresh = engine.refresh_camps().await.expect("fresh camps");
    assert_eq!(fresh.len(), 2);

    let mut events = engine.subscribe_events();
    gate.notify_one();
    let late = slow.await.expect("join").expect("slow camps");
    assert_eq!(late.len(), 2);

    let names: Vec<String> = engine
        .camps()
        .await
        .into_iter()
        .map(|camp| camp.name)
        .collect();
    assert_eq!(names, vec!["School", "Temple"]);
    assert_eq!(surface.live_layers(), 2);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn submitted_reports_show_up_and_clear() {
    let (engine, backend, _surface) = setup(ScriptedBackend::default());
    let report = EmergencyReport {
        status: ReportStatus::Sos,
        emergency: emergency("phone", Gender::Female, 40, 19.0, 72.0),
    };
    engine.submit_emergency(&report).await.expect("sos");
    assert_eq!(engine.emergencies().await.len(), 1);

    let clear = EmergencyReport {
        status: ReportStatus::Clear,
        ..report
    };
    engine.submit_emergency(&clear).await.expect("clear");
    assert!(engine.emergencies().await.is_empty());
    assert_eq!(
        *backend.reports.lock().unwrap(),
        vec![ReportStatus::Sos, ReportStatus::Clear]
    );
}
