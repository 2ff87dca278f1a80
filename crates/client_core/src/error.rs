use thiserror::Error;

use crate::{backend::BackendError, render::RenderError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("nothing is selected")]
    NothingSelected,
}
