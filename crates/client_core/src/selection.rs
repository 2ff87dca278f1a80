use std::fmt;

use shared::domain::{CampIndex, DeviceId};
use tracing::debug;

use crate::{
    render::{MarkerStyle, RenderError, RenderSurface},
    store::{CampStore, EmergencyStore, EntityStore},
};

/// The one entity, across both classes, the user is focused on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    None,
    Emergency(DeviceId),
    Camp(CampIndex),
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("nothing"),
            Self::Emergency(id) => write!(f, "emergency {id}"),
            Self::Camp(index) => write!(f, "camp #{index}"),
        }
    }
}

/// Keeps at most one entity wearing a selected icon.
///
/// The icon restored on deselect is always computed from the entity as it
/// is stored right now, so an attribute change that arrived while the entity
/// was selected is reflected as soon as it is released.
#[derive(Debug, Default)]
pub struct SelectionController {
    current: Selection,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Selection {
        &self.current
    }

    pub fn selected_emergency(&self) -> Option<&DeviceId> {
        match &self.current {
            Selection::Emergency(id) => Some(id),
            _ => None,
        }
    }

    pub fn selected_camp(&self) -> Option<CampIndex> {
        match self.current {
            Selection::Camp(index) => Some(index),
            _ => None,
        }
    }

    /// Returns `true` when the selection changed. Unknown ids and the
    /// already-selected id leave everything as it is.
    pub fn select_emergency(
        &mut self,
        id: &DeviceId,
        emergencies: &EmergencyStore,
        camps: &CampStore,
        surface: &dyn RenderSurface,
    ) -> Result<bool, RenderError> {
        if self.selected_emergency() == Some(id) {
            return Ok(false);
        }
        if emergencies.get(id).is_none() {
            debug!(device_id = %id, "ignoring selection of unknown emergency");
            return Ok(false);
        }

        self.restore(emergencies, camps, surface)?;
        emergencies.restyle(id, MarkerStyle::SelectedEmergency, surface)?;
        self.current = Selection::Emergency(id.clone());
        Ok(true)
    }

    pub fn select_camp(
        &mut self,
        index: CampIndex,
        emergencies: &EmergencyStore,
        camps: &CampStore,
        surface: &dyn RenderSurface,
    ) -> Result<bool, RenderError> {
        if self.selected_camp() == Some(index) {
            return Ok(false);
        }
        if camps.get(&index).is_none() {
            debug!(camp = %index, "ignoring selection of unknown camp");
            return Ok(false);
        }

        self.restore(emergencies, camps, surface)?;
        camps.restyle(&index, MarkerStyle::SelectedCamp, surface)?;
        self.current = Selection::Camp(index);
        Ok(true)
    }

    pub fn clear(
        &mut self,
        emergencies: &EmergencyStore,
        camps: &CampStore,
        surface: &dyn RenderSurface,
    ) -> Result<bool, RenderError> {
        if self.current == Selection::None {
            return Ok(false);
        }
        self.restore(emergencies, camps, surface)?;
        Ok(true)
    }

    /// The selected emergency left the store; its layers are already gone.
    pub fn forget_emergency(&mut self, id: &DeviceId) -> bool {
        if self.selected_emergency() == Some(id) {
            self.current = Selection::None;
            return true;
        }
        false
    }

    /// Camp indices were reassigned, so a held camp selection means nothing.
    pub fn invalidate_camps(&mut self) -> bool {
        if self.selected_camp().is_some() {
            self.current = Selection::None;
            return true;
        }
        false
    }

    fn restore(
        &mut self,
        emergencies: &EmergencyStore,
        camps: &CampStore,
        surface: &dyn RenderSurface,
    ) -> Result<(), RenderError> {
        match &self.current {
            Selection::None => {}
            Selection::Emergency(id) => {
                if let Some(style) = emergencies.default_style(id) {
                    emergencies.restyle(id, style, surface)?;
                }
            }
            Selection::Camp(index) => {
                if let Some(style) = camps.default_style(index) {
                    camps.restyle(index, style, surface)?;
                }
            }
        }
        self.current = Selection::None;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
