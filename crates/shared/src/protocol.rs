use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    lenient_age, lenient_gender, lenient_metres, DeviceId, Emergency, Gender, ReliefCamp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    Sos,
    Update,
    Clear,
}

/// Body of `POST /update` as sent by a reporting device.
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyReport {
    pub status: ReportStatus,
    #[serde(flatten)]
    pub emergency: Emergency,
}

/// Server-side view of `POST /update`. Everything is optional because the
/// reporting page may send a `CLEAR` with nothing but the device id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEmergencyRequest {
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    #[serde(default)]
    pub status: Option<ReportStatus>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_gender")]
    pub gender: Gender,
    #[serde(default, deserialize_with = "lenient_age")]
    pub age: u32,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default, deserialize_with = "lenient_metres")]
    pub accuracy: f64,
    #[serde(default)]
    pub is_manual: bool,
}

impl UpdateEmergencyRequest {
    pub fn is_clear(&self) -> bool {
        self.status == Some(ReportStatus::Clear)
    }

    /// Builds the stored record, stamped with the server's clock. Returns
    /// `None` when the device id or coordinates are missing.
    pub fn into_emergency(self, timestamp: DateTime<Utc>) -> Option<Emergency> {
        Some(Emergency {
            device_id: self.device_id?,
            name: self.name.unwrap_or_default(),
            gender: self.gender,
            age: self.age,
            lat: self.lat?,
            lon: self.lon?,
            accuracy: self.accuracy,
            is_manual: self.is_manual,
            timestamp,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveEmergencyRequest {
    pub device_id: DeviceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddReliefCampRequest {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveReliefCampRequest {
    #[serde(default)]
    pub index: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveSosQuery {
    #[serde(default)]
    pub id: Option<DeviceId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceUpdateResponse {
    pub success: bool,
    pub emergencies: Vec<Emergency>,
}

/// Body of `POST /sendEmails`. Anything other than a list of addresses
/// reads as no recipients.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAlertRequest {
    #[serde(default, deserialize_with = "lenient_address_list")]
    pub emails: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressList {
    List(Vec<String>),
    Other(serde::de::IgnoredAny),
}

fn lenient_address_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match AddressList::deserialize(deserializer)? {
        AddressList::List(emails) => emails,
        AddressList::Other(_) => Vec::new(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAlertResponse {
    pub success: bool,
    pub sent: usize,
}

/// On-disk layout of the backend's data file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSnapshot {
    #[serde(default)]
    pub emergencies: std::collections::BTreeMap<String, Emergency>,
    #[serde(default)]
    pub relief_camps: Vec<ReliefCamp>,
}
