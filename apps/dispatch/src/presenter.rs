//! Plain-text rendering of engine events for the terminal.

use std::fmt::Write as _;

use client_core::{EngineEvent, ListEntry, Selection};
use shared::domain::ReliefCamp;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

pub fn format_entry(entry: &ListEntry) -> String {
    let e = &entry.emergency;
    let location = if e.is_manual {
        "manual pin".to_string()
    } else {
        format!("GPS ±{}m", e.accuracy)
    };
    let mut line = format!(
        "{} ({}y, {}) [{}] {:.4}, {:.4} {}",
        e.display_name(),
        e.age,
        e.gender,
        e.device_id,
        e.lat,
        e.lon,
        location
    );
    if let Some(label) = &entry.distance_label {
        let _ = write!(line, " · {label}");
    }
    line
}

pub fn format_snapshot(entries: &[ListEntry], active_count: usize) -> String {
    let mut out = format!(
        "Active emergencies: {active_count} (showing {})",
        entries.len()
    );
    if entries.is_empty() {
        out.push_str("\n  No active emergencies");
    }
    for (position, entry) in entries.iter().enumerate() {
        let _ = write!(out, "\n  {:>2}. {}", position + 1, format_entry(entry));
    }
    out
}

pub fn format_camps(camps: &[ReliefCamp]) -> String {
    let mut out = format!("Relief camps: {}", camps.len());
    for (index, camp) in camps.iter().enumerate() {
        let _ = write!(
            out,
            "\n  #{index} {} ({:.4}, {:.4})",
            camp.name, camp.lat, camp.lng
        );
    }
    out
}

pub fn format_event(event: &EngineEvent) -> String {
    match event {
        EngineEvent::SnapshotApplied {
            entries,
            active_count,
        } => format_snapshot(entries, *active_count),
        EngineEvent::CampsApplied { camps } => format_camps(camps),
        EngineEvent::SelectionChanged(Selection::None) => "Selection cleared".to_string(),
        EngineEvent::SelectionChanged(selection) => format!("Selected {selection}"),
        EngineEvent::Error(message) => format!("Error: {message}"),
    }
}

/// Prints every event until the engine goes away.
pub async fn print_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", format_event(&event)),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "presenter fell behind engine events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
#[path = "tests/presenter_tests.rs"]
mod tests;
