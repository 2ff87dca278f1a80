use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const DEFAULT_CAMP_NAME: &str = "Emergency Shelter";

/// Externally assigned, stable identity of a reporting device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a relief camp in the backend's ordered camp list.
///
/// Only meaningful until the next camp fetch; the backend renumbers camps
/// whenever one is added or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampIndex(pub usize);

impl fmt::Display for CampIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unspecified,
}

impl Gender {
    /// Maps whatever the reporting form sent to a gender; anything that is
    /// not recognisably male or female is unspecified.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Self::Male,
            "female" | "f" => Self::Female,
            _ => Self::Unspecified,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown gender '{0}'")]
pub struct ParseGenderError(pub String);

impl FromStr for Gender {
    type Err = ParseGenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            "unspecified" => Ok(Self::Unspecified),
            other => Err(ParseGenderError(other.to_string())),
        }
    }
}

/// An active emergency signal as reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Emergency {
    pub device_id: DeviceId,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_gender")]
    pub gender: Gender,
    #[serde(default, deserialize_with = "lenient_age")]
    pub age: u32,
    pub lat: f64,
    pub lon: f64,
    /// Accuracy radius in metres; zero means unknown or manually placed.
    #[serde(default, deserialize_with = "lenient_metres")]
    pub accuracy: f64,
    #[serde(default)]
    pub is_manual: bool,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Emergency {
    /// GPS fixes with a known radius get an accuracy circle; manual pins never do.
    pub fn has_accuracy_circle(&self) -> bool {
        !self.is_manual && self.accuracy > 0.0
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            "Unknown"
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliefCamp {
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_camp_name", deserialize_with = "camp_name")]
    pub name: String,
}

impl ReliefCamp {
    pub fn new(lat: f64, lng: f64, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            lat,
            lng,
            name: normalize_camp_name(Some(name)),
        }
    }
}

pub fn normalize_camp_name(name: Option<String>) -> String {
    name.map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(default_camp_name)
}

fn default_camp_name() -> String {
    DEFAULT_CAMP_NAME.to_string()
}

fn camp_name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(normalize_camp_name(raw))
}

pub fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn lenient_gender<'de, D>(deserializer: D) -> Result<Gender, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().map(Gender::from_wire).unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Int(u64),
    Float(f64),
    Text(String),
}

/// Ages come straight from a form field, so both `25` and `"25"` occur.
pub fn lenient_age<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let age = match Option::<NumberOrText>::deserialize(deserializer)? {
        None => 0,
        Some(NumberOrText::Int(value)) => u32::try_from(value).unwrap_or(u32::MAX),
        Some(NumberOrText::Float(value)) if value.is_finite() && value > 0.0 => {
            value.min(u32::MAX as f64) as u32
        }
        Some(NumberOrText::Float(_)) => 0,
        Some(NumberOrText::Text(text)) => text.trim().parse::<u32>().unwrap_or(0),
    };
    Ok(age)
}

pub fn lenient_metres<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let metres = match Option::<NumberOrText>::deserialize(deserializer)? {
        None => 0.0,
        Some(NumberOrText::Int(value)) => value as f64,
        Some(NumberOrText::Float(value)) => value,
        Some(NumberOrText::Text(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
    };
    Ok(if metres.is_finite() { metres.max(0.0) } else { 0.0 })
}

/// Accepts RFC 3339 as well as naive ISO-8601 timestamps, which are taken
/// to be UTC.
pub fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("invalid timestamp '{raw}'"))
    })
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
