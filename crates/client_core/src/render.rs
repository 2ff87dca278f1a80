//! Map render surface collaborator and the styling rules for entity markers.

use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, MutexGuard},
};

use shared::domain::{Emergency, Gender, ReliefCamp};
use thiserror::Error;

use crate::geo::LatLng;

/// Stacking offset that keeps camps above emergency markers.
pub const CAMP_Z_OFFSET: i32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerStyle {
    Male,
    Female,
    MaleManual,
    FemaleManual,
    SelectedEmergency,
    Camp,
    SelectedCamp,
}

impl MarkerStyle {
    pub fn is_selected(self) -> bool {
        matches!(self, Self::SelectedEmergency | Self::SelectedCamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircleColor {
    Pink,
    Blue,
}

/// Resting icon of an emergency, derived only from its current attributes.
/// Anything that is not female uses the male artwork.
pub fn default_emergency_style(emergency: &Emergency) -> MarkerStyle {
    match (emergency.is_manual, emergency.gender) {
        (true, Gender::Female) => MarkerStyle::FemaleManual,
        (true, _) => MarkerStyle::MaleManual,
        (false, Gender::Female) => MarkerStyle::Female,
        (false, _) => MarkerStyle::Male,
    }
}

pub fn default_camp_style() -> MarkerStyle {
    MarkerStyle::Camp
}

pub fn accuracy_circle_color(gender: Gender) -> CircleColor {
    match gender {
        Gender::Female => CircleColor::Pink,
        _ => CircleColor::Blue,
    }
}

pub fn emergency_popup(emergency: &Emergency) -> String {
    let location = if emergency.is_manual {
        "Manual location".to_string()
    } else {
        format!("GPS (Accuracy: {}m)", emergency.accuracy)
    };
    format!(
        "{} ({}y)\nGender: {}\n{}\n{}",
        emergency.display_name(),
        emergency.age,
        emergency.gender,
        location,
        emergency.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

pub fn camp_popup(camp: &ReliefCamp) -> String {
    format!("{}\nLat: {:.4}, Lng: {:.4}", camp.name, camp.lat, camp.lng)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSpec {
    pub position: LatLng,
    pub style: MarkerStyle,
    pub popup: String,
    pub z_offset: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircleSpec {
    pub center: LatLng,
    pub radius_m: f64,
    pub color: CircleColor,
}

/// Marker plus optional accuracy circle bound to one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Representation {
    pub marker: LayerId,
    pub circle: Option<LayerId>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("render surface has no {0}")]
    UnknownLayer(LayerId),
    #[error("render surface unavailable: {0}")]
    Unavailable(String),
}

/// Whatever draws markers and circles on the map.
///
/// New layers start out visible.
pub trait RenderSurface: Send + Sync {
    fn create_marker(&self, spec: MarkerSpec) -> Result<LayerId, RenderError>;
    fn create_circle(&self, spec: CircleSpec) -> Result<LayerId, RenderError>;
    fn move_layer(&self, layer: LayerId, position: LatLng) -> Result<(), RenderError>;
    fn set_marker_style(&self, layer: LayerId, style: MarkerStyle) -> Result<(), RenderError>;
    fn set_popup(&self, layer: LayerId, popup: &str) -> Result<(), RenderError>;
    fn set_circle(
        &self,
        layer: LayerId,
        radius_m: f64,
        color: CircleColor,
    ) -> Result<(), RenderError>;
    fn set_visible(&self, layer: LayerId, visible: bool) -> Result<(), RenderError>;
    fn destroy(&self, layer: LayerId) -> Result<(), RenderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Marker {
        style: MarkerStyle,
        popup: String,
        z_offset: i32,
    },
    Circle {
        radius_m: f64,
        color: CircleColor,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedLayer {
    pub kind: LayerKind,
    pub position: LatLng,
    pub visible: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub created: usize,
    pub updated: usize,
    pub destroyed: usize,
}

#[derive(Default)]
struct RecordingState {
    next_id: u64,
    layers: HashMap<LayerId, RecordedLayer>,
    stats: RenderStats,
}

/// In-memory surface that keeps every live layer so callers can inspect
/// what would be on the map.
#[derive(Default)]
pub struct RecordingSurface {
    state: Mutex<RecordingState>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RecordingState>, RenderError> {
        self.state
            .lock()
            .map_err(|_| RenderError::Unavailable("recording surface lock poisoned".into()))
    }

    pub fn layer(&self, layer: LayerId) -> Option<RecordedLayer> {
        self.lock().ok()?.layers.get(&layer).cloned()
    }

    pub fn marker_style(&self, layer: LayerId) -> Option<MarkerStyle> {
        match self.layer(layer)?.kind {
            LayerKind::Marker { style, .. } => Some(style),
            LayerKind::Circle { .. } => None,
        }
    }

    pub fn live_layers(&self) -> usize {
        self.lock().map(|state| state.layers.len()).unwrap_or(0)
    }

    pub fn selected_markers(&self) -> Vec<LayerId> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let mut selected: Vec<LayerId> = state
            .layers
            .iter()
            .filter(|(_, layer)| {
                matches!(layer.kind, LayerKind::Marker { style, .. } if style.is_selected())
            })
            .map(|(id, _)| *id)
            .collect();
        selected.sort();
        selected
    }

    pub fn stats(&self) -> RenderStats {
        self.lock().map(|state| state.stats).unwrap_or_default()
    }

    fn insert(&self, kind: LayerKind, position: LatLng) -> Result<LayerId, RenderError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = LayerId(state.next_id);
        state.layers.insert(
            id,
            RecordedLayer {
                kind,
                position,
                visible: true,
            },
        );
        state.stats.created += 1;
        Ok(id)
    }

    fn update<F>(&self, layer: LayerId, apply: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut RecordedLayer),
    {
        let mut state = self.lock()?;
        let entry = state
            .layers
            .get_mut(&layer)
            .ok_or(RenderError::UnknownLayer(layer))?;
        apply(entry);
        state.stats.updated += 1;
        Ok(())
    }
}

impl RenderSurface for RecordingSurface {
    fn create_marker(&self, spec: MarkerSpec) -> Result<LayerId, RenderError> {
        self.insert(
            LayerKind::Marker {
                style: spec.style,
                popup: spec.popup,
                z_offset: spec.z_offset,
            },
            spec.position,
        )
    }

    fn create_circle(&self, spec: CircleSpec) -> Result<LayerId, RenderError> {
        self.insert(
            LayerKind::Circle {
                radius_m: spec.radius_m,
                color: spec.color,
            },
            spec.center,
        )
    }

    fn move_layer(&self, layer: LayerId, position: LatLng) -> Result<(), RenderError> {
        self.update(layer, |entry| entry.position = position)
    }

    fn set_marker_style(&self, layer: LayerId, style: MarkerStyle) -> Result<(), RenderError> {
        self.update(layer, |entry| {
            if let LayerKind::Marker { style: current, .. } = &mut entry.kind {
                *current = style;
            }
        })
    }

    fn set_popup(&self, layer: LayerId, popup: &str) -> Result<(), RenderError> {
        self.update(layer, |entry| {
            if let LayerKind::Marker { popup: current, .. } = &mut entry.kind {
                *current = popup.to_string();
            }
        })
    }

    fn set_circle(
        &self,
        layer: LayerId,
        radius_m: f64,
        color: CircleColor,
    ) -> Result<(), RenderError> {
        self.update(layer, |entry| {
            if let LayerKind::Circle {
                radius_m: current_radius,
                color: current_color,
            } = &mut entry.kind
            {
                *current_radius = radius_m;
                *current_color = color;
            }
        })
    }

    fn set_visible(&self, layer: LayerId, visible: bool) -> Result<(), RenderError> {
        self.update(layer, |entry| entry.visible = visible)
    }

    fn destroy(&self, layer: LayerId) -> Result<(), RenderError> {
        let mut state = self.lock()?;
        state
            .layers
            .remove(&layer)
            .ok_or(RenderError::UnknownLayer(layer))?;
        state.stats.destroyed += 1;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
