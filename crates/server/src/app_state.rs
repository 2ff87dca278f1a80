use std::sync::Arc;

use crate::{api::ApiContext, mailer::Mailer};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) mailer: Arc<dyn Mailer>,
    pub(crate) public_url: String,
}
