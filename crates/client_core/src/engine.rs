//! Live reconciliation of backend snapshots into the rendered map.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use shared::{
    domain::{normalize_camp_name, CampIndex, DeviceId, Emergency, ReliefCamp},
    protocol::EmergencyReport,
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    backend::ReliefBackend,
    error::EngineError,
    filter::{derive_view, ListEntry, ViewFilter},
    geo::LatLng,
    render::{RenderError, RenderSurface},
    selection::{Selection, SelectionController},
    store::{CampStore, EmergencyStore, EntityStore},
};

pub const LOAD_ERROR: &str = "Error loading data";
pub const CAMP_LOAD_ERROR: &str = "Error loading relief camps";

#[derive(Debug, Clone)]
pub enum EngineEvent {
    SnapshotApplied {
        entries: Vec<ListEntry>,
        active_count: usize,
    },
    SelectionChanged(Selection),
    CampsApplied {
        camps: Vec<ReliefCamp>,
    },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied { active_count: usize },
    /// Another refresh was already in flight.
    Skipped,
}

#[derive(Debug, Clone, Default)]
struct ViewSettings {
    filter: ViewFilter,
    reference: Option<LatLng>,
}

#[derive(Default)]
struct EngineState {
    emergencies: EmergencyStore,
    camps: CampStore,
    selection: SelectionController,
    /// Ids of the last applied snapshot, in backend order.
    order: Vec<DeviceId>,
    /// Request number of the camp list currently applied.
    camps_request: u64,
}

impl EngineState {
    fn current_emergencies(&self) -> Vec<Emergency> {
        self.order
            .iter()
            .filter_map(|id| self.emergencies.get(id).cloned())
            .collect()
    }

    fn drop_vanished_selection(&mut self) -> bool {
        let vanished = self
            .selection
            .selected_emergency()
            .filter(|id| self.emergencies.get(id).is_none())
            .cloned();
        match vanished {
            Some(id) => self.selection.forget_emergency(&id),
            None => false,
        }
    }
}

struct RefreshGuard<'a>(&'a AtomicBool);

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ReliefEngine {
    backend: Arc<dyn ReliefBackend>,
    surface: Arc<dyn RenderSurface>,
    view: RwLock<ViewSettings>,
    state: Mutex<EngineState>,
    refreshing: AtomicBool,
    camp_requests: AtomicU64,
    events: broadcast::Sender<EngineEvent>,
}

impl ReliefEngine {
    pub fn new(backend: Arc<dyn ReliefBackend>, surface: Arc<dyn RenderSurface>) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            backend,
            surface,
            view: RwLock::new(ViewSettings::default()),
            state: Mutex::new(EngineState::default()),
            refreshing: AtomicBool::new(false),
            camp_requests: AtomicU64::new(0),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn report<T>(&self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(err) = &result {
            self.emit(EngineEvent::Error(err.to_string()));
        }
        result
    }

    pub async fn filter(&self) -> ViewFilter {
        self.view.read().await.filter.clone()
    }

    pub async fn reference_point(&self) -> Option<LatLng> {
        self.view.read().await.reference
    }

    pub async fn selection(&self) -> Selection {
        self.state.lock().await.selection.current().clone()
    }

    /// Tracked emergencies in the order of the last applied snapshot.
    pub async fn emergencies(&self) -> Vec<Emergency> {
        self.state.lock().await.current_emergencies()
    }

    pub async fn camps(&self) -> Vec<ReliefCamp> {
        self.state.lock().await.camps.camps()
    }

    /// Fetches the active emergencies and brings the map in line with them.
    pub async fn refresh(&self) -> Result<RefreshOutcome, EngineError> {
        let Some(_guard) = RefreshGuard::acquire(&self.refreshing) else {
            debug!("refresh already in flight, skipping");
            return Ok(RefreshOutcome::Skipped);
        };

        let settings = self.view.read().await.clone();
        let snapshot = match self
            .backend
            .fetch_emergencies(settings.filter.identity.as_ref())
            .await
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(%err, "failed to load emergencies");
                self.emit(EngineEvent::Error(LOAD_ERROR.to_string()));
                return Err(err.into());
            }
        };
        let snapshot = settings.filter.restrict_to_identity(snapshot);

        let mut order = Vec::with_capacity(snapshot.len());
        let mut seen = HashSet::with_capacity(snapshot.len());
        for emergency in &snapshot {
            if seen.insert(emergency.device_id.clone()) {
                order.push(emergency.device_id.clone());
            }
        }

        let mut state = self.state.lock().await;
        let reconciled = {
            let EngineState {
                emergencies,
                selection,
                ..
            } = &mut *state;
            emergencies.reconcile(snapshot, selection.selected_emergency(), self.surface.as_ref())
        };
        if let Err(err) = reconciled {
            warn!(%err, "render surface failed during reconcile, keeping previous snapshot");
            return self.report(Err(err.into()));
        }
        state.order = order;
        if state.drop_vanished_selection() {
            self.emit(EngineEvent::SelectionChanged(Selection::None));
        }

        let entries = self.report(
            self.apply_view(&mut state, &settings)
                .map_err(EngineError::from),
        )?;
        let active_count = state.order.len();
        drop(state);

        info!(active_count, shown = entries.len(), "applied emergency snapshot");
        self.emit(EngineEvent::SnapshotApplied {
            entries,
            active_count,
        });
        Ok(RefreshOutcome::Applied { active_count })
    }

    /// Derives the filtered list and shows exactly its members on the map.
    fn apply_view(
        &self,
        state: &mut EngineState,
        settings: &ViewSettings,
    ) -> Result<Vec<ListEntry>, RenderError> {
        let current = settings
            .filter
            .restrict_to_identity(state.current_emergencies());
        let entries = derive_view(&current, &settings.filter, settings.reference);
        let visible: HashSet<DeviceId> = entries
            .iter()
            .filter(|entry| settings.filter.admits_identity(&entry.emergency))
            .map(|entry| entry.emergency.device_id.clone())
            .collect();
        let changed = state
            .emergencies
            .apply_visibility(&visible, self.surface.as_ref())?;
        if changed > 0 {
            debug!(changed, "updated emergency visibility");
        }
        Ok(entries)
    }

    /// Re-derives the view from what is already tracked, without fetching.
    async fn republish(&self) -> Result<Vec<ListEntry>, EngineError> {
        let settings = self.view.read().await.clone();
        let mut state = self.state.lock().await;
        let entries = self.report(
            self.apply_view(&mut state, &settings)
                .map_err(EngineError::from),
        )?;
        let active_count = state
            .order
            .iter()
            .filter(|id| settings.filter.identity.as_ref().map_or(true, |only| only == *id))
            .count();
        drop(state);

        self.emit(EngineEvent::SnapshotApplied {
            entries: entries.clone(),
            active_count,
        });
        Ok(entries)
    }

    pub async fn set_filter(&self, filter: ViewFilter) -> Result<Vec<ListEntry>, EngineError> {
        self.view.write().await.filter = filter;
        self.republish().await
    }

    pub async fn set_reference_point(
        &self,
        reference: Option<LatLng>,
    ) -> Result<Vec<ListEntry>, EngineError> {
        self.view.write().await.reference = reference;
        self.republish().await
    }

    /// Fetches and rebuilds the relief camps. A response that arrives after
    /// a newer request was already applied is dropped, and the camps on the
    /// map are returned instead.
    pub async fn refresh_camps(&self) -> Result<Vec<ReliefCamp>, EngineError> {
        let request = self.camp_requests.fetch_add(1, Ordering::AcqRel) + 1;
        let camps = match self.backend.fetch_relief_camps().await {
            Ok(camps) => camps,
            Err(err) => {
                warn!(%err, "failed to load relief camps");
                self.emit(EngineEvent::Error(CAMP_LOAD_ERROR.to_string()));
                return Err(err.into());
            }
        };

        let mut state = self.state.lock().await;
        if request < state.camps_request {
            debug!(request, applied = state.camps_request, "dropping superseded camp list");
            return Ok(state.camps.camps());
        }
        let rebuilt = state.camps.reconcile(camps, None, self.surface.as_ref());
        self.report(rebuilt.map_err(EngineError::from))?;
        state.camps_request = request;
        if state.selection.invalidate_camps() {
            self.emit(EngineEvent::SelectionChanged(Selection::None));
        }
        let camps = state.camps.camps();
        drop(state);

        debug!(count = camps.len(), "applied relief camps");
        self.emit(EngineEvent::CampsApplied {
            camps: camps.clone(),
        });
        Ok(camps)
    }

    pub async fn select_emergency(&self, id: &DeviceId) -> Result<bool, EngineError> {
        let mut state = self.state.lock().await;
        let EngineState {
            emergencies,
            camps,
            selection,
            ..
        } = &mut *state;
        let changed = self.report(
            selection
                .select_emergency(id, emergencies, camps, self.surface.as_ref())
                .map_err(EngineError::from),
        )?;
        if changed {
            self.emit(EngineEvent::SelectionChanged(selection.current().clone()));
        }
        Ok(changed)
    }

    pub async fn select_camp(&self, index: CampIndex) -> Result<bool, EngineError> {
        let mut state = self.state.lock().await;
        let EngineState {
            emergencies,
            camps,
            selection,
            ..
        } = &mut *state;
        let changed = self.report(
            selection
                .select_camp(index, emergencies, camps, self.surface.as_ref())
                .map_err(EngineError::from),
        )?;
        if changed {
            self.emit(EngineEvent::SelectionChanged(selection.current().clone()));
        }
        Ok(changed)
    }

    pub async fn clear_selection(&self) -> Result<bool, EngineError> {
        let mut state = self.state.lock().await;
        let EngineState {
            emergencies,
            camps,
            selection,
            ..
        } = &mut *state;
        let changed = self.report(
            selection
                .clear(emergencies, camps, self.surface.as_ref())
                .map_err(EngineError::from),
        )?;
        if changed {
            self.emit(EngineEvent::SelectionChanged(Selection::None));
        }
        Ok(changed)
    }

    /// Removes whatever is selected through the backend.
    pub async fn remove_selected(&self) -> Result<(), EngineError> {
        let target = self.selection().await;
        match target {
            Selection::None => Err(EngineError::NothingSelected),
            Selection::Emergency(id) => self.remove_emergency(&id).await,
            Selection::Camp(index) => self.remove_camp(index).await,
        }
    }

    /// Deletes the emergency on the backend, purges it locally, then
    /// refreshes. Removing an id the backend no longer has still succeeds.
    pub async fn remove_emergency(&self, id: &DeviceId) -> Result<(), EngineError> {
        if let Err(err) = self.backend.remove_emergency(id).await {
            warn!(device_id = %id, %err, "failed to remove emergency");
            return self.report(Err(err.into()));
        }
        info!(device_id = %id, "removed emergency");

        {
            let mut state = self.state.lock().await;
            let removed = state.emergencies.remove(id, self.surface.as_ref());
            self.report(removed.map_err(EngineError::from))?;
            state.order.retain(|tracked| tracked != id);
            if state.selection.forget_emergency(id) {
                self.emit(EngineEvent::SelectionChanged(Selection::None));
            }
        }

        self.republish().await?;
        self.refresh().await?;
        Ok(())
    }

    /// Deletes the camp at `index` and re-fetches the camp list. An index the
    /// backend refuses as out of range is stale and only triggers the fetch.
    pub async fn remove_camp(&self, index: CampIndex) -> Result<(), EngineError> {
        match self.backend.remove_relief_camp(index).await {
            Ok(()) => info!(camp = %index, "removed relief camp"),
            Err(err) if err.is_bad_request() => {
                debug!(camp = %index, %err, "camp index is stale, re-fetching camps");
            }
            Err(err) => {
                warn!(camp = %index, %err, "failed to remove relief camp");
                return self.report(Err(err.into()));
            }
        }
        self.refresh_camps().await?;
        Ok(())
    }

    /// Blank names fall back to the default shelter name.
    pub async fn add_relief_camp(
        &self,
        lat: f64,
        lng: f64,
        name: Option<&str>,
    ) -> Result<(), EngineError> {
        let name = normalize_camp_name(name.map(str::to_string));
        if let Err(err) = self.backend.add_relief_camp(lat, lng, &name).await {
            warn!(%err, "failed to add relief camp");
            return self.report(Err(err.into()));
        }
        info!(%name, lat, lng, "added relief camp");
        self.refresh_camps().await?;
        Ok(())
    }

    /// Sends a reporter-side SOS, location update or all-clear, then
    /// refreshes so the map reflects it.
    pub async fn submit_emergency(&self, report: &EmergencyReport) -> Result<(), EngineError> {
        if let Err(err) = self.backend.submit_emergency(report).await {
            warn!(device_id = %report.emergency.device_id, %err, "failed to submit report");
            return self.report(Err(err.into()));
        }
        info!(
            device_id = %report.emergency.device_id,
            status = ?report.status,
            "submitted emergency report"
        );
        self.refresh().await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
