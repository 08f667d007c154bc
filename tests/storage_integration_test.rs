//! Storage integration tests shared by both backends' SQL shapes

use std::sync::Arc;
use switchyard::models::{DeviceType, NewAnalyticEvent, NewLink, Target};
use switchyard::storage::{SqliteStorage, Storage};

/// Helper to create test storage
async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

async fn create_link(storage: &Arc<dyn Storage>, slug: &str) -> i64 {
    storage
        .create_link(&NewLink {
            slug: slug.to_string(),
            owner_id: "owner-1".to_string(),
            original_url: "https://example.com".to_string(),
            targets: vec![
                Target {
                    url: "https://a.example".to_string(),
                    weight: 1,
                },
                Target {
                    url: "https://b.example".to_string(),
                    weight: 1,
                },
            ],
            ..Default::default()
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_concurrent_increments_are_not_lost() {
    let storage = create_test_storage().await;
    let link_id = create_link(&storage, "busy").await;

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let storage = Arc::clone(&storage);
            tokio::spawn(async move { storage.increment_clicks(link_id).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let link = storage.get_link(link_id).await.unwrap().unwrap();
    assert_eq!(link.click_count, 50);
}

#[tokio::test]
async fn test_cursor_last_write_wins() {
    let storage = create_test_storage().await;
    let link_id = create_link(&storage, "cursor").await;

    storage.persist_cursor(link_id, 1).await.unwrap();
    storage.persist_cursor(link_id, 0).await.unwrap();

    let link = storage.get_link(link_id).await.unwrap().unwrap();
    assert_eq!(link.last_used_target_index, Some(0));
    assert_eq!(link.targets.len(), 2);
}

#[tokio::test]
async fn test_clicks_by_day_groups_utc_days() {
    let storage = create_test_storage().await;
    let link_id = create_link(&storage, "daily").await;

    // 2024-03-01T23:59:00Z, 2024-03-02T00:01:00Z, 2024-03-02T12:00:00Z
    for timestamp in [1_709_337_540, 1_709_337_660, 1_709_380_800] {
        storage
            .record_event(&NewAnalyticEvent {
                link_id,
                timestamp,
                ip_address: None,
                user_agent: None,
                country: None,
                city: None,
                device_type: DeviceType::Other,
                browser: None,
                os: None,
                referrer: Some(String::new()),
            })
            .await
            .unwrap();
    }

    let points = storage.clicks_by_day(link_id, None).await.unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].date, "2024-03-01");
    assert_eq!(points[0].clicks, 1);
    assert_eq!(points[1].date, "2024-03-02");
    assert_eq!(points[1].clicks, 2);

    let since = storage
        .clicks_by_day(link_id, Some(1_709_337_600))
        .await
        .unwrap();
    assert_eq!(since.len(), 1);

    // Empty referrers are not a group
    let referrers = storage
        .top_values(link_id, "referrer", None, 5)
        .await
        .unwrap();
    assert!(referrers.is_empty());

    let recent = storage.recent_events(link_id, None, 2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].timestamp, 1_709_380_800);
}
