//! Live reconciliation and selection engine for the relief map.
//!
//! [`ReliefEngine`] pulls emergency and relief camp snapshots from a
//! [`ReliefBackend`], keeps one rendered representation per entity on a
//! [`RenderSurface`] and tracks the single selected entity. Presentation
//! code listens to [`EngineEvent`]s.

pub mod backend;
pub mod engine;
pub mod error;
pub mod filter;
pub mod geo;
pub mod poll;
pub mod render;
pub mod selection;
pub mod store;

pub use backend::{BackendError, HttpBackend, ReliefBackend};
pub use engine::{EngineEvent, RefreshOutcome, ReliefEngine};
pub use error::EngineError;
pub use filter::{ListEntry, SortDirection, ViewFilter};
pub use geo::{distance_meters, format_distance, LatLng};
pub use poll::PollLoop;
pub use render::{MarkerStyle, RecordingSurface, RenderError, RenderSurface};
pub use selection::Selection;
