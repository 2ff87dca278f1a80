use super::*;
use chrono::{TimeZone, Utc};
use shared::domain::DeviceId;

fn emergency(gender: Gender, is_manual: bool, accuracy: f64) -> Emergency {
    Emergency {
        device_id: DeviceId::new("dev"),
        name: "Ravi".into(),
        gender,
        age: 40,
        lat: 12.97,
        lon: 77.59,
        accuracy,
        is_manual,
        timestamp: Utc.with_ymd_and_hms(2024, 7, 1, 9, 30, 0).unwrap(),
    }
}

#[test]
fn default_style_follows_gender_and_manual_flag() {
    assert_eq!(
        default_emergency_style(&emergency(Gender::Female, false, 5.0)),
        MarkerStyle::Female
    );
    assert_eq!(
        default_emergency_style(&emergency(Gender::Female, true, 0.0)),
        MarkerStyle::FemaleManual
    );
    assert_eq!(
        default_emergency_style(&emergency(Gender::Male, true, 0.0)),
        MarkerStyle::MaleManual
    );
    assert_eq!(
        default_emergency_style(&emergency(Gender::Unspecified, false, 5.0)),
        MarkerStyle::Male
    );
}

#[test]
fn popup_mentions_accuracy_only_for_gps_fixes() {
    let gps = emergency_popup(&emergency(Gender::Male, false, 18.0));
    assert!(gps.contains("Ravi (40y)"));
    assert!(gps.contains("GPS (Accuracy: 18m)"));

    let manual = emergency_popup(&emergency(Gender::Male, true, 0.0));
    assert!(manual.contains("Manual location"));
    assert!(!manual.contains("Accuracy"));
}

#[test]
fn camp_popup_rounds_coordinates() {
    let popup = camp_popup(&ReliefCamp::new(19.123456, 72.987654, "School"));
    assert_eq!(popup, "School\nLat: 19.1235, Lng: 72.9877");
}

#[test]
fn recording_surface_tracks_layer_lifecycle() {
    let surface = RecordingSurface::new();
    let marker = surface
        .create_marker(MarkerSpec {
            position: LatLng::new(1.0, 2.0),
            style: MarkerStyle::Male,
            popup: "p".into(),
            z_offset: 0,
        })
        .expect("marker");
    surface
        .set_marker_style(marker, MarkerStyle::SelectedEmergency)
        .expect("style");
    assert_eq!(surface.selected_markers(), vec![marker]);

    surface.set_visible(marker, false).expect("hide");
    assert!(!surface.layer(marker).expect("layer").visible);

    surface.destroy(marker).expect("destroy");
    assert_eq!(surface.live_layers(), 0);
    assert_eq!(
        surface.destroy(marker),
        Err(RenderError::UnknownLayer(marker))
    );

    let stats = surface.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.destroyed, 1);
}
