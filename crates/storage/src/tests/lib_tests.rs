use super::*;
use chrono::TimeZone;

fn catalog_row(pid: &str, address: &str, submarket: &str, class: &str) -> NewProperty {
    NewProperty {
        canvas_pid: pid.to_string(),
        primary_address: Some(address.to_string()),
        canvas_submarket: Some(submarket.to_string()),
        property_class: Some(class.to_string()),
        latitude: Some(38.9),
        longitude: Some(-77.0),
    }
}

async fn seeded() -> Storage {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .replace_properties(&[
            catalog_row("P2", "200 K Street", "East End", "A"),
            catalog_row("P1", "100 Main Street", "CBD", "A"),
            catalog_row("P3", "300 Main Avenue", "CBD", "B"),
        ])
        .await
        .expect("seed");
    storage
}

fn activation(pid: &str) -> NewUsageLog {
    NewUsageLog {
        event_type: UsageEventType::TableActivate,
        canvas_pid: Some(pid.to_string()),
        primary_address: Some(format!("{pid} address")),
        canvas_submarket: Some("CBD".to_string()),
        property_class: Some("A".to_string()),
        metadata: Some(serde_json::json!({"preset": "properties_overview_map"})),
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("kiosk_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("kiosk.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn sqlite_path_ignores_memory_and_query_suffix() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(sqlite_path("postgres://db"), None);
    assert_eq!(
        sqlite_path("sqlite://data/kiosk.db?mode=rwc"),
        Some(PathBuf::from("data/kiosk.db"))
    );
}

#[tokio::test]
async fn filters_properties_by_search_submarket_and_class() {
    let storage = seeded().await;

    let all = storage
        .list_properties(&PropertyFilter::default())
        .await
        .expect("all");
    let addresses: Vec<_> = all
        .iter()
        .map(|p| p.primary_address.clone().unwrap_or_default())
        .collect();
    assert_eq!(
        addresses,
        vec!["100 Main Street", "200 K Street", "300 Main Avenue"]
    );

    let main = storage
        .list_properties(&PropertyFilter {
            search: Some("MAIN".to_string()),
            ..PropertyFilter::default()
        })
        .await
        .expect("search");
    assert_eq!(main.len(), 2);

    let class_b_cbd = storage
        .list_properties(&PropertyFilter {
            search: Some(String::new()),
            submarket: Some("CBD".to_string()),
            property_class: Some("B".to_string()),
        })
        .await
        .expect("filtered");
    assert_eq!(class_b_cbd.len(), 1);
    assert_eq!(class_b_cbd[0].canvas_pid, "P3");
}

#[tokio::test]
async fn lists_distinct_submarkets_and_classes() {
    let storage = seeded().await;
    assert_eq!(
        storage.list_submarkets().await.expect("submarkets"),
        vec!["CBD", "East End"]
    );
    assert_eq!(
        storage.list_property_classes().await.expect("classes"),
        vec!["A", "B"]
    );
}

#[tokio::test]
async fn refresh_replaces_catalog_and_keeps_last_duplicate() {
    let storage = seeded().await;
    let count = storage
        .replace_properties(&[
            catalog_row("P9", "9 Old Road", "CBD", "C"),
            catalog_row("P9", "9 New Road", "CBD", "A"),
        ])
        .await
        .expect("refresh");
    assert_eq!(count, 2);

    let all = storage
        .list_properties(&PropertyFilter::default())
        .await
        .expect("all");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].primary_address.as_deref(), Some("9 New Road"));
    assert!(storage
        .find_property_by_pid("P1")
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn script_steps_keep_order_and_snapshot() {
    let storage = seeded().await;
    let p1 = storage
        .find_property_by_pid("P1")
        .await
        .expect("lookup")
        .expect("P1");
    let steps = vec![
        Step::WebContent(WebContentStep {
            web_url: "https://example.com/intro".to_string(),
        }),
        Step::Property(p1.to_step()),
    ];

    let script = storage
        .create_script("Morning tour", Some("lobby"), &steps)
        .await
        .expect("create");
    assert_eq!(script.steps, steps);
    assert_eq!(script.description.as_deref(), Some("lobby"));

    storage
        .replace_properties(&[catalog_row("P1", "Renamed", "CBD", "A")])
        .await
        .expect("refresh");
    let reloaded = storage
        .get_script(script.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(reloaded.steps, steps);
}

#[tokio::test]
async fn update_replaces_steps_and_unknown_script_is_none() {
    let storage = seeded().await;
    let original = storage
        .create_script(
            "Tour",
            None,
            &[Step::WebContent(WebContentStep {
                web_url: "https://example.com".to_string(),
            })],
        )
        .await
        .expect("create");

    let replacement = vec![Step::Property(PropertyStep {
        canvas_pid: "P2".to_string(),
        primary_address: None,
        canvas_submarket: None,
        property_class: None,
        latitude: None,
        longitude: None,
    })];
    let updated = storage
        .update_script(original.id, "Tour v2", Some("new"), &replacement)
        .await
        .expect("update")
        .expect("exists");
    assert_eq!(updated.name, "Tour v2");
    assert_eq!(updated.steps, replacement);
    assert!(updated.updated_at >= original.updated_at);

    assert!(storage
        .update_script(ScriptId(999), "x", None, &replacement)
        .await
        .expect("update missing")
        .is_none());
}

#[tokio::test]
async fn lists_script_summaries_and_deletes() {
    let storage = seeded().await;
    let step = Step::WebContent(WebContentStep {
        web_url: "https://example.com".to_string(),
    });
    let first = storage
        .create_script("First", None, std::slice::from_ref(&step))
        .await
        .expect("first");
    let second = storage
        .create_script("Second", None, &[step.clone(), step])
        .await
        .expect("second");

    let summaries = storage.list_scripts().await.expect("list");
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].id, second.id);
    assert_eq!(summaries[0].step_count, 2);
    assert_eq!(summaries[1].step_count, 1);

    assert!(storage.delete_script(first.id).await.expect("delete"));
    assert!(!storage.delete_script(first.id).await.expect("delete again"));
    assert!(storage.get_script(first.id).await.expect("get").is_none());
    assert_eq!(storage.list_scripts().await.expect("list").len(), 1);
}

#[tokio::test]
async fn records_usage_and_links_known_property() {
    let storage = seeded().await;
    let known = storage.record_usage(&activation("P1")).await.expect("known");
    let unknown = storage
        .record_usage(&activation("GONE"))
        .await
        .expect("unknown");

    assert_eq!(known.event_type, "table_activate");
    assert!(known.property_id.is_some());
    assert_eq!(
        known.metadata,
        Some(serde_json::json!({"preset": "properties_overview_map"}))
    );
    assert!(unknown.property_id.is_none());

    let recent = storage.recent_usage(1).await.expect("recent");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, unknown.id);
}

#[tokio::test]
async fn analytics_counts_within_inclusive_day_range() {
    let storage = seeded().await;
    let at = |day: u32, hour: u32| Utc.with_ymd_and_hms(2024, 3, day, hour, 15, 0).unwrap();

    storage
        .record_usage_at(&activation("P1"), at(1, 9))
        .await
        .expect("p1 day1");
    storage
        .record_usage_at(&activation("P1"), at(2, 9))
        .await
        .expect("p1 day2");
    storage
        .record_usage_at(&activation("P2"), at(2, 14))
        .await
        .expect("p2 day2");
    storage
        .record_usage_at(
            &NewUsageLog::event(
                UsageEventType::AdminRefresh,
                serde_json::json!({"recordsProcessed": 3}),
            ),
            at(3, 14),
        )
        .await
        .expect("refresh day3");
    storage
        .record_usage_at(&activation("P3"), at(5, 9))
        .await
        .expect("outside range");

    let range = DateRange {
        start: NaiveDate::from_ymd_opt(2024, 3, 1),
        end: NaiveDate::from_ymd_opt(2024, 3, 3),
    };
    let report = storage.usage_analytics(range, None).await.expect("report");

    assert_eq!(report.summary.total_events, 4);
    assert_eq!(report.summary.total_activations, 3);
    assert_eq!(report.summary.total_refreshes, 1);
    assert_eq!(report.summary.unique_properties_activated, 2);
    assert_eq!(report.summary.first_event, Some(at(1, 9)));
    assert_eq!(report.summary.last_event, Some(at(3, 14)));

    assert_eq!(report.events_by_type[0].event_type, "table_activate");
    assert_eq!(report.events_by_type[0].count, 3);

    assert_eq!(report.top_properties[0].canvas_pid, "P1");
    assert_eq!(report.top_properties[0].activation_count, 2);

    let days: Vec<_> = report.activity_by_day.iter().map(|d| d.date.as_str()).collect();
    assert_eq!(days, vec!["2024-03-03", "2024-03-02", "2024-03-01"]);
    assert_eq!(report.activity_by_day[1].activations, 2);

    let hours: Vec<_> = report
        .activity_by_hour
        .iter()
        .map(|h| (h.hour, h.event_count))
        .collect();
    assert_eq!(hours, vec![(9, 2), (14, 2)]);

    let limited = storage
        .usage_analytics(DateRange::default(), Some(1))
        .await
        .expect("limited");
    assert_eq!(limited.summary.total_events, 5);
    assert_eq!(limited.top_properties.len(), 1);
    assert_eq!(limited.activity_by_day.len(), 1);
}

#[tokio::test]
async fn empty_analytics_report_is_zeroed() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let report = storage
        .usage_analytics(DateRange::default(), None)
        .await
        .expect("report");
    assert_eq!(report.summary.total_events, 0);
    assert_eq!(report.summary.first_event, None);
    assert!(report.top_properties.is_empty());
    assert!(report.activity_by_hour.is_empty());
}
