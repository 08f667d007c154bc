//! Click recorder integration tests

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use switchyard::classifier::{Classifier, GeoLookup, GeoProvider};
use switchyard::config::RecorderConfig;
use switchyard::models::NewLink;
use switchyard::recorder::{ClickRecorder, Visit};
use switchyard::storage::{SqliteStorage, Storage};

/// Answers every lookup from a fixed location and remembers the last IP
struct FixedProvider {
    seen: std::sync::Mutex<Option<IpAddr>>,
}

#[async_trait]
impl GeoProvider for FixedProvider {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn lookup(&self, ip: IpAddr) -> GeoLookup {
        *self.seen.lock().unwrap() = Some(ip);
        GeoLookup {
            country: Some("DE".to_string()),
            city: Some("Berlin".to_string()),
            error: None,
        }
    }
}

async fn setup() -> (Arc<dyn Storage>, i64) {
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new("sqlite::memory:", 1).await.unwrap());
    storage.init().await.unwrap();
    let link = storage
        .create_link(&NewLink {
            slug: "rec".to_string(),
            owner_id: "owner-1".to_string(),
            original_url: "https://example.com".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    (storage, link.id)
}

fn visit(ip: IpAddr, user_agent: &str) -> Visit {
    Visit {
        timestamp: 1_700_000_000,
        ip,
        user_agent: Some(user_agent.to_string()),
        referrer: Some("https://news.example/".to_string()),
        accept_language: Some("en-US,en;q=0.9".to_string()),
    }
}

#[tokio::test]
async fn test_shutdown_drains_queued_jobs() {
    let (storage, link_id) = setup().await;
    let provider = Arc::new(FixedProvider {
        seen: std::sync::Mutex::new(None),
    });
    let fallback = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
    let classifier = Arc::new(Classifier::new(provider.clone(), fallback));
    let recorder = ClickRecorder::new(
        Arc::clone(&storage),
        classifier,
        &RecorderConfig {
            workers: 3,
            queue_capacity: 100,
        },
    );

    for _ in 0..10 {
        recorder.increment_clicks(link_id);
    }
    recorder.persist_cursor(link_id, 4);
    recorder.record(
        link_id,
        visit(
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148 Safari/604.1",
        ),
    );

    recorder.shutdown().await;

    let stats = recorder.stats();
    assert_eq!(stats.submitted, 12);
    assert_eq!(stats.completed, 12);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.dropped, 0);

    let link = storage.get_link(link_id).await.unwrap().unwrap();
    assert_eq!(link.click_count, 10);
    assert_eq!(link.last_used_target_index, Some(4));

    // Private visitors are geolocated as the fallback address
    assert_eq!(*provider.seen.lock().unwrap(), Some(fallback));

    let events = storage.recent_events(link_id, None, 10).await.unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.device_type, "mobile");
    assert_eq!(event.country.as_deref(), Some("DE"));
    assert_eq!(event.city.as_deref(), Some("Berlin"));
    assert_eq!(event.ip_address.as_deref(), Some("192.168.1.20"));
    assert_eq!(event.referrer.as_deref(), Some("https://news.example/"));
    assert_eq!(event.timestamp, 1_700_000_000);
}

#[tokio::test]
async fn test_jobs_after_shutdown_are_dropped() {
    let (storage, link_id) = setup().await;
    let classifier = Arc::new(Classifier::new(
        Arc::new(switchyard::classifier::DisabledGeoProvider),
        IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
    ));
    let recorder = ClickRecorder::new(Arc::clone(&storage), classifier, &RecorderConfig::default());

    recorder.shutdown().await;
    recorder.increment_clicks(link_id);

    assert_eq!(recorder.stats().dropped, 1);
    let link = storage.get_link(link_id).await.unwrap().unwrap();
    assert_eq!(link.click_count, 0);
}

#[tokio::test]
async fn test_failed_writes_are_counted_not_retried() {
    let (storage, _) = setup().await;
    let classifier = Arc::new(Classifier::new(
        Arc::new(switchyard::classifier::DisabledGeoProvider),
        IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
    ));
    let recorder = ClickRecorder::new(Arc::clone(&storage), classifier, &RecorderConfig::default());

    // No such link: the foreign key rejects the event
    recorder.record(9999, visit(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)), ""));
    recorder.shutdown().await;

    let stats = recorder.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 0);
}
