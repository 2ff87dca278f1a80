use super::*;
use chrono::{TimeZone, Utc};
use shared::domain::{DeviceId, Emergency, Gender, ReliefCamp};
use std::{
    fs,
    time::{SystemTime, UNIX_EPOCH},
};

fn temp_root(label: &str) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!("relief_server_{label}_{suffix}"))
}

fn sample() -> Emergency {
    Emergency {
        device_id: DeviceId::new("dev-1"),
        name: "Ravi".into(),
        gender: Gender::Male,
        age: 41,
        lat: 19.0,
        lon: 72.8,
        accuracy: 8.0,
        is_manual: false,
        timestamp: Utc.with_ymd_and_hms(2024, 7, 1, 6, 0, 0).unwrap(),
    }
}

#[tokio::test]
async fn mutations_are_persisted_and_reloaded() {
    let root = temp_root("persist");
    let path = root.join("nested").join("emergencyData.json");

    let store = ReliefStore::open(path.clone()).await;
    store
        .mutate(|data| {
            data.emergencies.insert("dev-1".into(), sample());
            data.relief_camps.push(ReliefCamp::new(19.1, 72.9, "School"));
            ((), true)
        })
        .await;

    let raw = fs::read_to_string(&path).expect("data file written");
    let json: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(json["emergencies"]["dev-1"]["deviceId"], "dev-1");
    assert_eq!(json["reliefCamps"][0]["name"], "School");

    let reopened = ReliefStore::open(path).await;
    let (emergencies, camps) = reopened
        .read(|data| (data.emergencies.len(), data.relief_camps.len()))
        .await;
    assert_eq!((emergencies, camps), (1, 1));

    fs::remove_dir_all(root).expect("cleanup");
}

#[tokio::test]
async fn unchanged_mutation_does_not_write() {
    let root = temp_root("untouched");
    let path = root.join("emergencyData.json");

    let store = ReliefStore::open(path.clone()).await;
    store.mutate(|_| ((), false)).await;
    assert!(!path.exists());
}

#[tokio::test]
async fn unreadable_file_starts_empty() {
    let root = temp_root("corrupt");
    fs::create_dir_all(&root).expect("root");
    let path = root.join("emergencyData.json");
    fs::write(&path, "{ not json").expect("write");

    let store = ReliefStore::open(path).await;
    let empty = store
        .read(|data| data.emergencies.is_empty() && data.relief_camps.is_empty())
        .await;
    assert!(empty);

    fs::remove_dir_all(root).expect("cleanup");
}
