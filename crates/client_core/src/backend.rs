//! The relief backend collaborator and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{CampIndex, DeviceId, Emergency, ReliefCamp},
    error::ApiError,
    protocol::{
        AddReliefCampRequest, EmergencyReport, RemoveEmergencyRequest, RemoveReliefCampRequest,
        SuccessResponse,
    },
};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    MalformedSnapshot(String),
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl BackendError {
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::Rejected { status, .. } if *status == StatusCode::BAD_REQUEST.as_u16())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedSnapshot(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[async_trait]
pub trait ReliefBackend: Send + Sync {
    /// Active emergencies, optionally narrowed server-side to one device.
    async fn fetch_emergencies(
        &self,
        identity: Option<&DeviceId>,
    ) -> Result<Vec<Emergency>, BackendError>;
    async fn fetch_relief_camps(&self) -> Result<Vec<ReliefCamp>, BackendError>;
    async fn remove_emergency(&self, id: &DeviceId) -> Result<(), BackendError>;
    async fn remove_relief_camp(&self, index: CampIndex) -> Result<(), BackendError>;
    async fn add_relief_camp(&self, lat: f64, lng: f64, name: &str) -> Result<(), BackendError>;
    async fn submit_emergency(&self, report: &EmergencyReport) -> Result<(), BackendError>;
}

pub struct HttpBackend {
    http: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(mut base: Url, timeout: Duration) -> Result<Self, BackendError> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, route: &str) -> Result<Url, BackendError> {
        self.base
            .join(route)
            .map_err(|err| BackendError::Network(format!("invalid route {route}: {err}")))
    }

    async fn rejection(response: Response) -> BackendError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|api| api.message)
            .unwrap_or_else(|_| {
                if body.trim().is_empty() {
                    status.to_string()
                } else {
                    body
                }
            });
        BackendError::Rejected {
            status: status.as_u16(),
            message,
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|err| BackendError::MalformedSnapshot(err.to_string()))
    }

    async fn expect_success(response: Response) -> Result<(), BackendError> {
        let status = response.status();
        let body: SuccessResponse = Self::read_json(response).await?;
        if body.success {
            Ok(())
        } else {
            Err(BackendError::Rejected {
                status: status.as_u16(),
                message: "backend reported failure".into(),
            })
        }
    }
}

#[async_trait]
impl ReliefBackend for HttpBackend {
    async fn fetch_emergencies(
        &self,
        identity: Option<&DeviceId>,
    ) -> Result<Vec<Emergency>, BackendError> {
        let mut request = self.http.get(self.endpoint("getActiveSOS")?);
        if let Some(id) = identity {
            request = request.query(&[("id", id.as_str())]);
        }
        let response = request.send().await?;
        let emergencies: Vec<Emergency> = Self::read_json(response).await?;
        debug!(count = emergencies.len(), "fetched active emergencies");
        Ok(emergencies)
    }

    async fn fetch_relief_camps(&self) -> Result<Vec<ReliefCamp>, BackendError> {
        let response = self
            .http
            .get(self.endpoint("getReliefCamps")?)
            .send()
            .await?;
        let camps: Vec<ReliefCamp> = Self::read_json(response).await?;
        debug!(count = camps.len(), "fetched relief camps");
        Ok(camps)
    }

    async fn remove_emergency(&self, id: &DeviceId) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.endpoint("removeSOS")?)
            .json(&RemoveEmergencyRequest {
                device_id: id.clone(),
            })
            .send()
            .await?;
        Self::expect_success(response).await
    }

    async fn remove_relief_camp(&self, index: CampIndex) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.endpoint("removeReliefCamp")?)
            .json(&RemoveReliefCampRequest {
                index: i64::try_from(index.0).ok(),
            })
            .send()
            .await?;
        Self::expect_success(response).await
    }

    async fn add_relief_camp(&self, lat: f64, lng: f64, name: &str) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.endpoint("addReliefCamp")?)
            .json(&AddReliefCampRequest {
                lat: Some(lat),
                lng: Some(lng),
                name: Some(name.to_string()),
            })
            .send()
            .await?;
        Self::expect_success(response).await
    }

    async fn submit_emergency(&self, report: &EmergencyReport) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.endpoint("update")?)
            .json(report)
            .send()
            .await?;
        Self::expect_success(response).await
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
