use shared::domain::{Step, UsageEventType, WebContentStep};
use shared::protocol::PropertyFilter;
use storage::{DateRange, NewProperty, NewUsageLog, Storage};

#[tokio::test]
async fn refresh_author_play_and_report_acceptance() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");

    let refreshed = storage
        .replace_properties(&[
            NewProperty {
                canvas_pid: "PID-1".to_string(),
                primary_address: Some("1 Capitol Plaza".to_string()),
                canvas_submarket: Some("Capitol Hill".to_string()),
                property_class: Some("A".to_string()),
                latitude: Some(38.89),
                longitude: Some(-77.01),
            },
            NewProperty {
                canvas_pid: "PID-2".to_string(),
                primary_address: Some("2 Union Station".to_string()),
                canvas_submarket: None,
                property_class: None,
                latitude: None,
                longitude: None,
            },
        ])
        .await
        .expect("refresh");
    assert_eq!(refreshed, 2);
    storage
        .record_usage(&NewUsageLog::event(
            UsageEventType::AdminRefresh,
            serde_json::json!({ "recordsProcessed": refreshed }),
        ))
        .await
        .expect("refresh log");

    let catalog = storage
        .list_properties(&PropertyFilter::default())
        .await
        .expect("catalog");
    let steps: Vec<Step> = catalog
        .iter()
        .map(|property| Step::Property(property.to_step()))
        .chain(std::iter::once(Step::WebContent(WebContentStep {
            web_url: "https://example.com/closing".to_string(),
        })))
        .collect();
    let script = storage
        .create_script("Visitor tour", None, &steps)
        .await
        .expect("script");

    for step in &script.steps {
        if let Step::Property(property) = step {
            storage
                .record_usage(&NewUsageLog {
                    event_type: UsageEventType::TableActivate,
                    canvas_pid: Some(property.canvas_pid.clone()),
                    primary_address: property.primary_address.clone(),
                    canvas_submarket: property.canvas_submarket.clone(),
                    property_class: property.property_class.clone(),
                    metadata: None,
                })
                .await
                .expect("activation log");
        }
    }

    let summaries = storage.list_scripts().await.expect("summaries");
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].step_count, 3);

    let report = storage
        .usage_analytics(DateRange::default(), None)
        .await
        .expect("analytics");
    assert_eq!(report.summary.total_events, 3);
    assert_eq!(report.summary.total_activations, 2);
    assert_eq!(report.summary.total_refreshes, 1);
    assert_eq!(report.top_properties.len(), 2);
    assert_eq!(storage.recent_usage(50).await.expect("recent").len(), 3);
}
