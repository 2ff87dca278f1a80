//! Local bookkeeping of rendered entities.
//!
//! Each store owns the representations of its entities. A reconcile first
//! stages every new layer and attribute change on the surface and only
//! commits its bookkeeping once all of them succeeded. A failed stage is
//! rolled back, so the store keeps the previous snapshot.

use std::collections::{HashMap, HashSet};

use shared::domain::{CampIndex, DeviceId, Emergency, ReliefCamp};
use tracing::{debug, warn};

use crate::{
    geo::LatLng,
    render::{
        accuracy_circle_color, camp_popup, default_camp_style, default_emergency_style,
        emergency_popup, CircleSpec, LayerId, MarkerSpec, MarkerStyle, RenderError, RenderSurface,
        Representation, CAMP_Z_OFFSET,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport<K> {
    pub added: Vec<K>,
    pub updated: Vec<K>,
    pub removed: Vec<K>,
}

impl<K> Default for ReconcileReport<K> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<K> ReconcileReport<K> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

pub trait EntityStore {
    type Key;
    type Entity;

    /// Brings the store and its representations in line with `snapshot`.
    /// `selected` keeps its selection icon through updates.
    fn reconcile(
        &mut self,
        snapshot: Vec<Self::Entity>,
        selected: Option<&Self::Key>,
        surface: &dyn RenderSurface,
    ) -> Result<ReconcileReport<Self::Key>, RenderError>;

    fn get(&self, key: &Self::Key) -> Option<&Self::Entity>;

    fn all(&self) -> Vec<&Self::Entity>;

    fn representation(&self, key: &Self::Key) -> Option<Representation>;

    /// Resting style of the entity computed from its current attributes.
    fn default_style(&self, key: &Self::Key) -> Option<MarkerStyle>;

    /// Returns `false` when the key is not tracked.
    fn restyle(
        &self,
        key: &Self::Key,
        style: MarkerStyle,
        surface: &dyn RenderSurface,
    ) -> Result<bool, RenderError> {
        let Some(representation) = self.representation(key) else {
            return Ok(false);
        };
        surface.set_marker_style(representation.marker, style)?;
        Ok(true)
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct TrackedEmergency {
    pub emergency: Emergency,
    pub representation: Representation,
    pub visible: bool,
}

#[derive(Debug, Default)]
pub struct EmergencyStore {
    entries: HashMap<DeviceId, TrackedEmergency>,
}

impl EmergencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops one entity and its layers. Removing an absent id is a no-op.
    pub fn remove(
        &mut self,
        id: &DeviceId,
        surface: &dyn RenderSurface,
    ) -> Result<bool, RenderError> {
        let Some(tracked) = self.entries.get_mut(id) else {
            return Ok(false);
        };
        if let Some(circle) = tracked.representation.circle {
            surface.destroy(circle)?;
            tracked.representation.circle = None;
        }
        surface.destroy(tracked.representation.marker)?;
        self.entries.remove(id);
        Ok(true)
    }

    /// Shows exactly the ids in `visible` and hides every other tracked
    /// entity. Hidden entities keep their layers. Returns how many entities
    /// changed visibility.
    pub fn apply_visibility(
        &mut self,
        visible: &HashSet<DeviceId>,
        surface: &dyn RenderSurface,
    ) -> Result<usize, RenderError> {
        let mut changed = 0;
        for (id, tracked) in self.entries.iter_mut() {
            let want = visible.contains(id);
            if tracked.visible == want {
                continue;
            }
            if let Some(circle) = tracked.representation.circle {
                surface.set_visible(circle, want)?;
            }
            surface.set_visible(tracked.representation.marker, want)?;
            tracked.visible = want;
            changed += 1;
        }
        Ok(changed)
    }

    pub fn is_visible(&self, id: &DeviceId) -> bool {
        self.entries.get(id).is_some_and(|tracked| tracked.visible)
    }

    fn create_representation(
        emergency: &Emergency,
        style: MarkerStyle,
        surface: &dyn RenderSurface,
    ) -> Result<Representation, RenderError> {
        let position = LatLng::new(emergency.lat, emergency.lon);
        let marker = surface.create_marker(MarkerSpec {
            position,
            style,
            popup: emergency_popup(emergency),
            z_offset: 0,
        })?;

        let circle = if emergency.has_accuracy_circle() {
            let created = surface.create_circle(CircleSpec {
                center: position,
                radius_m: emergency.accuracy,
                color: accuracy_circle_color(emergency.gender),
            });
            match created {
                Ok(circle) => Some(circle),
                Err(err) => {
                    // the marker must not outlive a failed insert
                    discard_layer(marker, surface);
                    return Err(err);
                }
            }
        } else {
            None
        };

        Ok(Representation { marker, circle })
    }

    fn update_tracked(
        tracked: &mut TrackedEmergency,
        next: Emergency,
        is_selected: bool,
        surface: &dyn RenderSurface,
    ) -> Result<(), RenderError> {
        let position = LatLng::new(next.lat, next.lon);
        let marker = tracked.representation.marker;
        surface.move_layer(marker, position)?;
        surface.set_popup(marker, &emergency_popup(&next))?;
        if !is_selected {
            surface.set_marker_style(marker, default_emergency_style(&next))?;
        }

        match (tracked.representation.circle, next.has_accuracy_circle()) {
            (Some(circle), true) => {
                surface.move_layer(circle, position)?;
                surface.set_circle(circle, next.accuracy, accuracy_circle_color(next.gender))?;
            }
            (Some(circle), false) => {
                surface.destroy(circle)?;
                tracked.representation.circle = None;
            }
            (None, true) => {
                let circle = surface.create_circle(CircleSpec {
                    center: position,
                    radius_m: next.accuracy,
                    color: accuracy_circle_color(next.gender),
                })?;
                tracked.representation.circle = Some(circle);
                if !tracked.visible {
                    surface.set_visible(circle, false)?;
                }
            }
            (None, false) => {}
        }

        tracked.emergency = next;
        Ok(())
    }

    /// Puts staged updates back to the committed attributes. The staged
    /// representation is kept since it names the layers that exist now.
    fn revert_staged(
        &mut self,
        staged: Vec<(DeviceId, TrackedEmergency)>,
        selected: Option<&DeviceId>,
        surface: &dyn RenderSurface,
    ) {
        for (id, mut tracked) in staged {
            let Some(previous) = self.entries.get(&id).map(|t| t.emergency.clone()) else {
                continue;
            };
            let is_selected = selected == Some(&id);
            if let Err(err) =
                Self::update_tracked(&mut tracked, previous.clone(), is_selected, surface)
            {
                warn!(device_id = %id, %err, "failed to revert staged emergency update");
            }
            tracked.emergency = previous;
            self.entries.insert(id, tracked);
        }
    }
}

fn discard_layer(layer: LayerId, surface: &dyn RenderSurface) {
    if let Err(err) = surface.destroy(layer) {
        warn!(%layer, %err, "failed to destroy layer, it may be orphaned");
    }
}

fn discard_representation(representation: Representation, surface: &dyn RenderSurface) {
    if let Some(circle) = representation.circle {
        discard_layer(circle, surface);
    }
    discard_layer(representation.marker, surface);
}

fn discard_created(created: &[(DeviceId, TrackedEmergency)], surface: &dyn RenderSurface) {
    for (_, tracked) in created {
        discard_representation(tracked.representation, surface);
    }
}

impl EntityStore for EmergencyStore {
    type Key = DeviceId;
    type Entity = Emergency;

    fn reconcile(
        &mut self,
        snapshot: Vec<Emergency>,
        selected: Option<&DeviceId>,
        surface: &dyn RenderSurface,
    ) -> Result<ReconcileReport<DeviceId>, RenderError> {
        let mut order = Vec::with_capacity(snapshot.len());
        let mut incoming: HashMap<DeviceId, Emergency> = HashMap::with_capacity(snapshot.len());
        for emergency in snapshot {
            let id = emergency.device_id.clone();
            if incoming.insert(id.clone(), emergency).is_none() {
                order.push(id);
            }
        }

        let mut gone: Vec<DeviceId> = self
            .entries
            .keys()
            .filter(|id| !incoming.contains_key(*id))
            .cloned()
            .collect();
        gone.sort();

        let mut created: Vec<(DeviceId, TrackedEmergency)> = Vec::new();
        for id in &order {
            if self.entries.contains_key(id) {
                continue;
            }
            let Some(next) = incoming.get(id) else {
                continue;
            };
            let style = if selected == Some(id) {
                MarkerStyle::SelectedEmergency
            } else {
                default_emergency_style(next)
            };
            match Self::create_representation(next, style, surface) {
                Ok(representation) => created.push((
                    id.clone(),
                    TrackedEmergency {
                        emergency: next.clone(),
                        representation,
                        visible: true,
                    },
                )),
                Err(err) => {
                    discard_created(&created, surface);
                    return Err(err);
                }
            }
        }

        let mut staged: Vec<(DeviceId, TrackedEmergency)> = Vec::new();
        for id in &order {
            let (Some(current), Some(next)) = (self.entries.get(id), incoming.get(id)) else {
                continue;
            };
            if current.emergency == *next {
                continue;
            }
            let mut tracked = current.clone();
            let applied =
                Self::update_tracked(&mut tracked, next.clone(), selected == Some(id), surface);
            staged.push((id.clone(), tracked));
            if let Err(err) = applied {
                self.revert_staged(staged, selected, surface);
                discard_created(&created, surface);
                return Err(err);
            }
        }

        let mut report = ReconcileReport::default();
        for (id, tracked) in staged {
            self.entries.insert(id.clone(), tracked);
            report.updated.push(id);
        }
        for (id, tracked) in created {
            self.entries.insert(id.clone(), tracked);
            report.added.push(id);
        }
        for id in gone {
            if let Some(tracked) = self.entries.remove(&id) {
                discard_representation(tracked.representation, surface);
                report.removed.push(id);
            }
        }

        debug!(
            added = report.added.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            "reconciled emergency store"
        );
        Ok(report)
    }

    fn get(&self, key: &DeviceId) -> Option<&Emergency> {
        self.entries.get(key).map(|tracked| &tracked.emergency)
    }

    fn all(&self) -> Vec<&Emergency> {
        self.entries.values().map(|tracked| &tracked.emergency).collect()
    }

    fn representation(&self, key: &DeviceId) -> Option<Representation> {
        self.entries.get(key).map(|tracked| tracked.representation)
    }

    fn default_style(&self, key: &DeviceId) -> Option<MarkerStyle> {
        self.get(key).map(default_emergency_style)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone)]
pub struct TrackedCamp {
    pub camp: ReliefCamp,
    pub marker: LayerId,
}

/// Camps are identified by position, which the backend reassigns on every
/// change, so every reconcile rebuilds the whole set.
#[derive(Debug, Default)]
pub struct CampStore {
    entries: Vec<TrackedCamp>,
}

impl CampStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camps(&self) -> Vec<ReliefCamp> {
        self.entries.iter().map(|tracked| tracked.camp.clone()).collect()
    }
}

impl EntityStore for CampStore {
    type Key = CampIndex;
    type Entity = ReliefCamp;

    fn reconcile(
        &mut self,
        snapshot: Vec<ReliefCamp>,
        _selected: Option<&CampIndex>,
        surface: &dyn RenderSurface,
    ) -> Result<ReconcileReport<CampIndex>, RenderError> {
        let mut rebuilt = Vec::with_capacity(snapshot.len());
        for camp in snapshot {
            let created = surface.create_marker(MarkerSpec {
                position: LatLng::new(camp.lat, camp.lng),
                style: default_camp_style(),
                popup: camp_popup(&camp),
                z_offset: CAMP_Z_OFFSET,
            });
            match created {
                Ok(marker) => rebuilt.push(TrackedCamp { camp, marker }),
                Err(err) => {
                    for tracked in &rebuilt {
                        discard_layer(tracked.marker, surface);
                    }
                    return Err(err);
                }
            }
        }

        let previous = std::mem::replace(&mut self.entries, rebuilt);
        for tracked in &previous {
            discard_layer(tracked.marker, surface);
        }

        let report = ReconcileReport {
            added: (0..self.entries.len()).map(CampIndex).collect(),
            updated: Vec::new(),
            removed: (0..previous.len()).map(CampIndex).collect(),
        };
        debug!(
            added = report.added.len(),
            removed = report.removed.len(),
            "rebuilt camp store"
        );
        Ok(report)
    }

    fn get(&self, key: &CampIndex) -> Option<&ReliefCamp> {
        self.entries.get(key.0).map(|tracked| &tracked.camp)
    }

    fn all(&self) -> Vec<&ReliefCamp> {
        self.entries.iter().map(|tracked| &tracked.camp).collect()
    }

    fn representation(&self, key: &CampIndex) -> Option<Representation> {
        self.entries.get(key.0).map(|tracked| Representation {
            marker: tracked.marker,
            circle: None,
        })
    }

    fn default_style(&self, key: &CampIndex) -> Option<MarkerStyle> {
        self.get(key).map(|_| default_camp_style())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
