use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{TimeDelta, Utc};
use shared::{
    domain::{Emergency, ReliefCamp},
    error::{ApiError, ErrorCode},
    protocol::{
        ActiveSosQuery, AddReliefCampRequest, ForceUpdateResponse, RemoveEmergencyRequest,
        RemoveReliefCampRequest, SendAlertRequest, SendAlertResponse, SuccessResponse,
        UpdateEmergencyRequest,
    },
};
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;
mod mailer;
mod store;

use api::ApiContext;
use app_state::AppState;
use config::load_settings;
use mailer::mailer_from_settings;
use store::ReliefStore;

const MAX_BODY_BYTES: usize = 256 * 1024;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let store = ReliefStore::open(settings.data_file.clone()).await;
    let api = ApiContext {
        store: Arc::new(store),
    };

    let _sweep = spawn_expiry_sweep(
        api.clone(),
        settings.emergency_ttl(),
        settings.cleanup_interval(),
    );

    let app = build_router(Arc::new(AppState {
        api,
        mailer: mailer_from_settings(&settings),
        public_url: settings.public_url.clone(),
    }));
    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, data_file = %settings.data_file.display(), "relief backend listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/update", post(update))
        .route("/getActiveSOS", get(get_active_sos))
        .route("/removeSOS", post(remove_sos))
        .route("/forceUpdate", get(force_update))
        .route("/updateAdminMap", post(update_admin_map))
        .route("/getReliefCamps", get(get_relief_camps))
        .route("/addReliefCamp", post(add_relief_camp))
        .route("/removeReliefCamp", post(remove_relief_camp))
        .route("/sendEmails", post(send_emails))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Periodically drops emergencies that stopped reporting.
fn spawn_expiry_sweep(api: ApiContext, ttl: TimeDelta, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(every);
        loop {
            timer.tick().await;
            let expired = api::expire_stale(&api, Utc::now(), ttl).await;
            if !expired.is_empty() {
                info!(count = expired.len(), "expired stale emergencies");
            }
        }
    })
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(%status, message = %err.message, "request failed");
    }
    (status, Json(err))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn update(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateEmergencyRequest>,
) -> ApiResult<SuccessResponse> {
    api::report_emergency(&state.api, req, Utc::now())
        .await
        .map_err(reject)?;
    Ok(Json(SuccessResponse::ok()))
}

async fn get_active_sos(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActiveSosQuery>,
) -> Json<Vec<Emergency>> {
    Json(api::active_emergencies(&state.api, q.id.as_ref()).await)
}

async fn remove_sos(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemoveEmergencyRequest>,
) -> Json<SuccessResponse> {
    if api::remove_emergency(&state.api, &req.device_id).await {
        info!(device_id = %req.device_id, "emergency removed by admin");
    }
    Json(SuccessResponse::ok())
}

async fn force_update(State(state): State<Arc<AppState>>) -> Json<ForceUpdateResponse> {
    Json(ForceUpdateResponse {
        success: true,
        emergencies: api::active_emergencies(&state.api, None).await,
    })
}

async fn update_admin_map(
    State(state): State<Arc<AppState>>,
    Json(pins): Json<Vec<UpdateEmergencyRequest>>,
) -> ApiResult<SuccessResponse> {
    let count = api::upsert_pins(&state.api, pins, Utc::now())
        .await
        .map_err(reject)?;
    info!(count, "admin map pins applied");
    Ok(Json(SuccessResponse::ok()))
}

async fn get_relief_camps(State(state): State<Arc<AppState>>) -> Json<Vec<ReliefCamp>> {
    Json(api::relief_camps(&state.api).await)
}

async fn add_relief_camp(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddReliefCampRequest>,
) -> ApiResult<SuccessResponse> {
    api::add_relief_camp(&state.api, req)
        .await
        .map_err(reject)?;
    Ok(Json(SuccessResponse::ok()))
}

async fn remove_relief_camp(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RemoveReliefCampRequest>,
) -> ApiResult<SuccessResponse> {
    api::remove_relief_camp(&state.api, req)
        .await
        .map_err(reject)?;
    Ok(Json(SuccessResponse::ok()))
}

async fn send_emails(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendAlertRequest>,
) -> ApiResult<SendAlertResponse> {
    let sent = api::send_alert(&state.api, state.mailer.as_ref(), &state.public_url, req)
        .await
        .map_err(reject)?;
    Ok(Json(SendAlertResponse {
        success: true,
        sent,
    }))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
