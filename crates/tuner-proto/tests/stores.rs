use tuner_proto::protocol::{Station, ValidationStatus};
use tuner_proto::store::{JsonSettingsStore, JsonStationStore, SettingsStore, StationStore};

fn station(id: &str, name: &str) -> Station {
    Station::new(id, name, format!("http://{id}.example/live"))
}

#[tokio::test]
async fn station_list_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("stations.json");

    let store = JsonStationStore::open(path.clone());
    assert!(store.stations().await.is_empty());
    store
        .replace_all(vec![station("a", "Alpha"), station("b", "Beta")])
        .await
        .unwrap();
    store
        .set_validation_status("b", ValidationStatus::Failed)
        .await
        .unwrap();
    store.reorder(&["b".to_string()]).await.unwrap();

    let reopened = JsonStationStore::open(path);
    let all = reopened.stations().await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, "b");
    assert_eq!(all[0].position, 0);
    assert_eq!(all[0].validation_status, ValidationStatus::Failed);
    assert_eq!(all[1].name, "Alpha");
}

#[tokio::test]
async fn settings_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let settings = JsonSettingsStore::open(path.clone());
    assert_eq!(settings.load().await.volume, None);
    settings.set_volume(0.45).await.unwrap();
    settings.set_last_station(Some("fip")).await.unwrap();

    let state = JsonSettingsStore::open(path).load().await;
    assert_eq!(state.volume, Some(0.45));
    assert_eq!(state.last_station_id.as_deref(), Some("fip"));
}

#[tokio::test]
async fn corrupt_files_fall_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let stations = dir.path().join("stations.json");
    let state = dir.path().join("state.json");
    std::fs::write(&stations, "{ not json").unwrap();
    std::fs::write(&state, "[1, 2").unwrap();

    assert!(JsonStationStore::open(stations).stations().await.is_empty());
    assert_eq!(
        JsonSettingsStore::open(state).load().await,
        Default::default()
    );
}
