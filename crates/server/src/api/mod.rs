use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use shared::{
    domain::{normalize_camp_name, DeviceId, Emergency, ReliefCamp},
    error::{ApiError, ErrorCode},
    protocol::{
        AddReliefCampRequest, RemoveReliefCampRequest, SendAlertRequest, UpdateEmergencyRequest,
    },
};
use tracing::{info, warn};
use url::form_urlencoded;

use crate::{
    mailer::{AlertEmail, Mailer},
    store::ReliefStore,
};

pub const ALERT_SUBJECT: &str = "Emergency Alert";

#[derive(Clone)]
pub struct ApiContext {
    pub store: Arc<ReliefStore>,
}

fn validation(message: &str) -> ApiError {
    ApiError::new(ErrorCode::Validation, message)
}

/// Upserts a report stamped with `now`, or drops the device on `CLEAR`.
pub async fn report_emergency(
    ctx: &ApiContext,
    req: UpdateEmergencyRequest,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    let Some(device_id) = req.device_id.clone() else {
        return Err(validation("deviceId required"));
    };

    if req.is_clear() {
        let removed = ctx
            .store
            .mutate(|data| {
                let removed = data.emergencies.remove(device_id.as_str()).is_some();
                (removed, removed)
            })
            .await;
        if removed {
            info!(%device_id, "emergency cleared by reporter");
        }
        return Ok(());
    }

    let emergency = req
        .into_emergency(now)
        .filter(|e| e.lat.is_finite() && e.lon.is_finite())
        .ok_or_else(|| validation("Coordinates are required"))?;
    ctx.store
        .mutate(|data| {
            data.emergencies
                .insert(device_id.as_str().to_string(), emergency);
            ((), true)
        })
        .await;
    Ok(())
}

/// Active emergencies ordered by device id, optionally only one device.
pub async fn active_emergencies(ctx: &ApiContext, only: Option<&DeviceId>) -> Vec<Emergency> {
    ctx.store
        .read(|data| {
            data.emergencies
                .values()
                .filter(|e| only.map_or(true, |id| &e.device_id == id))
                .cloned()
                .collect()
        })
        .await
}

/// Idempotent: removing an unknown device succeeds.
pub async fn remove_emergency(ctx: &ApiContext, device_id: &DeviceId) -> bool {
    ctx.store
        .mutate(|data| {
            let removed = data.emergencies.remove(device_id.as_str()).is_some();
            (removed, removed)
        })
        .await
}

/// Re-stamps and upserts every pin. Nothing is applied if any pin is
/// missing its device id or coordinates.
pub async fn upsert_pins(
    ctx: &ApiContext,
    pins: Vec<UpdateEmergencyRequest>,
    now: DateTime<Utc>,
) -> Result<usize, ApiError> {
    let mut emergencies = Vec::with_capacity(pins.len());
    for pin in pins {
        if pin.device_id.is_none() {
            return Err(validation("deviceId required"));
        }
        let emergency = pin
            .into_emergency(now)
            .ok_or_else(|| validation("Coordinates are required"))?;
        emergencies.push(emergency);
    }

    let count = emergencies.len();
    ctx.store
        .mutate(|data| {
            for emergency in emergencies {
                data.emergencies
                    .insert(emergency.device_id.as_str().to_string(), emergency);
            }
            ((), count > 0)
        })
        .await;
    Ok(count)
}

pub async fn relief_camps(ctx: &ApiContext) -> Vec<ReliefCamp> {
    ctx.store.read(|data| data.relief_camps.clone()).await
}

pub async fn add_relief_camp(
    ctx: &ApiContext,
    req: AddReliefCampRequest,
) -> Result<ReliefCamp, ApiError> {
    let (Some(lat), Some(lng)) = (req.lat, req.lng) else {
        return Err(validation("Coordinates are required"));
    };
    if !lat.is_finite() || !lng.is_finite() {
        return Err(validation("Coordinates are required"));
    }

    let camp = ReliefCamp {
        lat,
        lng,
        name: normalize_camp_name(req.name),
    };
    ctx.store
        .mutate(|data| {
            data.relief_camps.push(camp.clone());
            ((), true)
        })
        .await;
    info!(name = %camp.name, lat, lng, "relief camp added");
    Ok(camp)
}

pub async fn remove_relief_camp(
    ctx: &ApiContext,
    req: RemoveReliefCampRequest,
) -> Result<ReliefCamp, ApiError> {
    let removed = ctx
        .store
        .mutate(|data| {
            let index = req
                .index
                .and_then(|index| usize::try_from(index).ok())
                .filter(|index| *index < data.relief_camps.len());
            match index {
                Some(index) => (Some(data.relief_camps.remove(index)), true),
                None => (None, false),
            }
        })
        .await;
    let camp = removed.ok_or_else(|| validation("Invalid camp index"))?;
    info!(name = %camp.name, "relief camp removed");
    Ok(camp)
}

/// Drops emergencies whose last report is older than `ttl`.
pub async fn expire_stale(ctx: &ApiContext, now: DateTime<Utc>, ttl: TimeDelta) -> Vec<DeviceId> {
    ctx.store
        .mutate(|data| {
            let expired: Vec<String> = data
                .emergencies
                .iter()
                .filter(|(_, e)| now - e.timestamp > ttl)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                data.emergencies.remove(key);
            }
            let changed = !expired.is_empty();
            (expired.into_iter().map(DeviceId::new).collect(), changed)
        })
        .await
}

/// Emails an alert about one device to every address in the request.
/// Returns how many recipients it went to.
pub async fn send_alert(
    ctx: &ApiContext,
    mailer: &dyn Mailer,
    public_url: &str,
    req: SendAlertRequest,
) -> Result<usize, ApiError> {
    if req.emails.is_empty() {
        return Err(validation("Emails array is required"));
    }
    let message = req.message.unwrap_or_default();
    if message.is_empty() {
        return Err(validation("Message is required"));
    }

    let reporter = match &req.device_id {
        Some(id) => {
            ctx.store
                .read(|data| data.emergencies.get(id.as_str()).cloned())
                .await
        }
        None => None,
    };
    let tracking = tracking_url(public_url, req.device_id.as_ref());
    let html = alert_html(&message, req.device_id.as_ref(), reporter.as_ref(), &tracking);

    let sent = req.emails.len();
    let email = AlertEmail {
        recipients: req.emails,
        subject: ALERT_SUBJECT.to_string(),
        html,
    };
    if let Err(err) = mailer.send(email).await {
        warn!(error = %format!("{err:#}"), "failed to send alert emails");
        return Err(ApiError::new(ErrorCode::Internal, "Failed to send emails"));
    }
    info!(sent, device_id = ?req.device_id, "alert emails sent");
    Ok(sent)
}

/// Link to the admin map narrowed to a single device.
pub fn tracking_url(public_url: &str, device_id: Option<&DeviceId>) -> String {
    let id: String = device_id
        .map(|id| form_urlencoded::byte_serialize(id.as_str().as_bytes()).collect())
        .unwrap_or_default();
    format!("{}/admin?id={id}", public_url.trim_end_matches('/'))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn alert_html(
    message: &str,
    device_id: Option<&DeviceId>,
    reporter: Option<&Emergency>,
    tracking: &str,
) -> String {
    const UNKNOWN: &str = "Unknown";
    let field = |value: Option<String>| escape_html(value.as_deref().unwrap_or(UNKNOWN));
    let name = field(reporter.map(|e| e.display_name().to_string()));
    let age = field(reporter.map(|e| e.age.to_string()));
    let gender = field(reporter.map(|e| e.gender.to_string()));
    let device = field(device_id.map(|id| id.to_string()));
    let location = field(reporter.map(|e| format!("{}, {}", e.lat, e.lon)));
    let accuracy = field(reporter.map(|e| format!("{} m", e.accuracy)));
    let timestamp = field(reporter.map(|e| e.timestamp.to_rfc3339()));

    format!(
        "<div style=\"font-family: system-ui; max-width: 600px; margin: auto;\">\n\
         <h2>Emergency Alert</h2>\n\
         <p><strong>{message}</strong></p>\n\
         <ul>\n\
         <li><b>Name:</b> {name}</li>\n\
         <li><b>Age:</b> {age}</li>\n\
         <li><b>Gender:</b> {gender}</li>\n\
         <li><b>Device ID:</b> {device}</li>\n\
         <li><b>Location:</b> {location}</li>\n\
         <li><b>Accuracy:</b> {accuracy}</li>\n\
         <li><b>Timestamp:</b> {timestamp}</li>\n\
         </ul>\n\
         <p>Track the user's location: <a href=\"{href}\">Click to Track Location</a></p>\n\
         </div>\n",
        message = escape_html(message),
        href = escape_html(tracking),
    )
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
