//! Aggregation pipeline integration tests
//!
//! Generation handling, dedupe, failure isolation, refetch carry-over and the
//! query subscription, driven through mock adapters.

mod helpers;

use chrono::Duration;
use helpers::*;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use whalemap_agg::types::{RefetchPolicy, Source, SourceAdapter};
use whalemap_common::events::{QueryField, WhalemapEvent};
use whalemap_common::LonLat;

const TIMEOUT: StdDuration = StdDuration::from_secs(2);

fn at_sea() -> LonLat {
    LonLat::new(-123.0, 48.3)
}

#[tokio::test]
async fn test_scenario_two_orcas_linked() {
    let citizen: Arc<dyn SourceAdapter> = Arc::new(StaticAdapter::new(
        "inaturalist",
        vec![
            animal(Source::INaturalist, 1, "Orcinus orca", at_sea(), 0),
            animal(Source::INaturalist, 2, "Orcinus orca", at_sea(), 2),
        ],
    ));
    let pipeline = test_pipeline(vec![citizen], test_query("Cetacea", Duration::days(1)), TIMEOUT);

    let report = pipeline.refresh().await;
    assert_eq!(report.generation, 1);
    assert_eq!(report.published, 2);
    assert!(!report.superseded);

    let travels = pipeline.travels().await;
    assert_eq!(travels.len(), 1);
    assert_eq!(travels[0].from, "inaturalist:1");
    assert_eq!(travels[0].to, "inaturalist:2");
    assert_eq!(travels[0].distance_meters, 0.0);
    assert_eq!(travels[0].elapsed_seconds, 7200);
}

#[tokio::test]
async fn test_scenario_taxon_narrowing_keeps_vessels() {
    let citizen = Arc::new(StaticAdapter::new(
        "inaturalist",
        vec![
            animal(Source::INaturalist, 1, "Orcinus orca", at_sea(), 0),
            animal(Source::INaturalist, 2, "Megaptera novaeangliae", at_sea(), 1),
        ],
    ));
    let vessels = Arc::new(StaticAdapter::with_policy(
        "wsf",
        vec![vessel("Tokitae", LonLat::new(-122.4, 47.95))],
        RefetchPolicy::ONCE,
    ));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![citizen.clone(), vessels.clone()];
    let pipeline = test_pipeline(adapters, test_query("Cetacea", Duration::days(1)), TIMEOUT);

    pipeline.refresh().await;
    assert_eq!(pipeline.observations().await.len(), 3);

    assert!(pipeline.query().set_taxon_str("Orcinus orca").unwrap());
    let report = pipeline.refresh().await;

    assert_eq!(report.fetched, vec!["inaturalist"]);
    assert_eq!(report.carried, vec!["wsf"]);
    assert_eq!(vessels.calls(), 1);
    assert_eq!(citizen.calls(), 2);

    let ids: Vec<String> = pipeline
        .observations()
        .await
        .iter()
        .map(|o| o.id.clone())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"inaturalist:1".to_string()));
    assert!(ids.contains(&"wsf:Tokitae".to_string()));
}

#[tokio::test]
async fn test_superseded_generation_never_published() {
    let slow = Arc::new(ScriptedAdapter::new(
        "inaturalist",
        vec![
            (
                StdDuration::from_secs(5),
                vec![animal(Source::INaturalist, 1, "Orcinus orca", at_sea(), 0)],
            ),
            (
                StdDuration::ZERO,
                vec![animal(Source::INaturalist, 2, "Orcinus orca", at_sea(), 0)],
            ),
        ],
    ));
    let shared: Arc<dyn SourceAdapter> = slow.clone();
    let pipeline = test_pipeline(
        vec![shared],
        test_query("Cetacea", Duration::days(1)),
        StdDuration::from_secs(10),
    );

    let first = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.refresh().await })
    };
    while slow.calls() == 0 {
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }

    pipeline.query().set_radius(Duration::hours(12));
    let second = pipeline.refresh().await;
    assert_eq!(second.generation, 2);
    assert!(!second.superseded);

    // The first fetch is cancelled by the newer generation
    let first = tokio::time::timeout(StdDuration::from_secs(2), first)
        .await
        .expect("superseded refresh should finish promptly")
        .unwrap();
    assert_eq!(first.generation, 1);
    assert!(first.superseded);
    assert!(first.failed.is_empty());

    let published = pipeline.observations().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].id, "inaturalist:2");
    assert_eq!(pipeline.settled_generation().await, 2);
}

#[tokio::test]
async fn test_overlapping_refreshes_publish_current_query() {
    let citizen: Arc<dyn SourceAdapter> = Arc::new(StaticAdapter::new(
        "inaturalist",
        vec![
            animal(Source::INaturalist, 1, "Orcinus orca", at_sea(), 0),
            animal(Source::INaturalist, 2, "Megaptera novaeangliae", at_sea(), 1),
        ],
    ));
    let pipeline = test_pipeline(vec![citizen], test_query("Cetacea", Duration::days(1)), TIMEOUT);

    let first = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.refresh().await })
    };
    assert!(pipeline.query().set_taxon_str("Megaptera novaeangliae").unwrap());
    let second = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.refresh().await })
    };
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(pipeline.settled_generation().await, 2);
    let published = pipeline.observations().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].taxon.as_deref(), Some("Megaptera novaeangliae"));
    assert_eq!(
        pipeline.query().snapshot().taxon.scientific_name,
        "Megaptera novaeangliae"
    );
}

#[tokio::test]
async fn test_same_id_from_two_adapters_kept_once() {
    let shared = animal(Source::Maplify, 7, "Orcinus orca", at_sea(), 0);
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(StaticAdapter::new("first", vec![shared.clone()])),
        Arc::new(StaticAdapter::new("second", vec![shared])),
    ];
    let pipeline = test_pipeline(adapters, test_query("Cetacea", Duration::days(1)), TIMEOUT);

    let report = pipeline.refresh().await;
    assert_eq!(report.published, 1);
    assert!(pipeline.travels().await.is_empty());
}

#[tokio::test]
async fn test_failing_and_slow_adapters_isolated() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(FailingAdapter("maplify")),
        Arc::new(ScriptedAdapter::new(
            "wsf",
            vec![(StdDuration::from_secs(10), vec![vessel("Hiyu", at_sea())])],
        )),
        Arc::new(StaticAdapter::new(
            "inaturalist",
            vec![animal(Source::INaturalist, 1, "Orcinus orca", at_sea(), 0)],
        )),
    ];
    let pipeline = test_pipeline(
        adapters,
        test_query("Cetacea", Duration::days(1)),
        StdDuration::from_millis(100),
    );
    let mut events = pipeline.subscribe();

    let report = pipeline.refresh().await;
    assert_eq!(report.published, 1);
    assert_eq!(report.failed.len(), 2);
    let timed_out = report.failed.iter().find(|f| f.source == "wsf").unwrap();
    assert!(timed_out.error.contains("Timed out"));

    let mut failures = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let WhalemapEvent::AdapterFailed { source, .. } = event {
            failures.push(source);
        }
    }
    failures.sort();
    assert_eq!(failures, vec!["maplify", "wsf"]);
}

#[tokio::test]
async fn test_correlation_uses_unfiltered_collection() {
    let citizen: Arc<dyn SourceAdapter> = Arc::new(StaticAdapter::new(
        "inaturalist",
        vec![
            animal(Source::INaturalist, 1, "Orcinus orca", at_sea(), 0),
            animal(Source::INaturalist, 2, "Orcinus orca", at_sea(), 2),
        ],
    ));
    let pipeline = test_pipeline(vec![citizen], test_query("Cetacea", Duration::hours(1)), TIMEOUT);

    let report = pipeline.refresh().await;
    assert_eq!(report.published, 1);
    assert_eq!(report.travels, 1);
}

#[tokio::test]
async fn test_unchanged_query_carries_and_reload_refetches() {
    let citizen = Arc::new(StaticAdapter::new(
        "inaturalist",
        vec![animal(Source::INaturalist, 1, "Orcinus orca", at_sea(), 0)],
    ));
    let local = Arc::new(StaticAdapter::with_policy(
        "local",
        vec![animal(Source::Local, 2, "Phocoena phocoena", at_sea(), 0)],
        RefetchPolicy::EVERY_CYCLE,
    ));
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![citizen.clone(), local.clone()];
    let pipeline = test_pipeline(adapters, test_query("Cetacea", Duration::days(1)), TIMEOUT);

    pipeline.refresh().await;
    let report = pipeline.refresh().await;
    assert_eq!(report.carried, vec!["inaturalist"]);
    assert_eq!(report.fetched, vec!["local"]);
    assert_eq!(report.published, 2);
    assert_eq!(citizen.calls(), 1);
    assert_eq!(local.calls(), 2);

    let report = pipeline.reload().await;
    assert!(report.carried.is_empty());
    assert_eq!(citizen.calls(), 2);
    assert_eq!(local.calls(), 3);
}

#[tokio::test]
async fn test_observations_in_extent() {
    let citizen: Arc<dyn SourceAdapter> = Arc::new(StaticAdapter::new(
        "inaturalist",
        vec![
            animal(Source::INaturalist, 1, "Orcinus orca", LonLat::new(-123.0, 48.5), 0),
            animal(Source::INaturalist, 2, "Orcinus orca", LonLat::new(-122.3, 47.6), 1),
        ],
    ));
    let pipeline = test_pipeline(vec![citizen], test_query("Cetacea", Duration::days(1)), TIMEOUT);
    pipeline.refresh().await;

    let north = whalemap_common::Extent::new(-124.0, 48.0, -122.5, 49.0).unwrap();
    let inside = pipeline.observations_in_extent(&north).await;
    assert_eq!(inside.len(), 1);
    assert_eq!(inside[0].id, "inaturalist:1");
}

#[tokio::test]
async fn test_attached_query_change_schedules_refresh() {
    let citizen: Arc<dyn SourceAdapter> = Arc::new(StaticAdapter::new(
        "inaturalist",
        vec![
            animal(Source::INaturalist, 1, "Orcinus orca", at_sea(), 0),
            animal(Source::INaturalist, 2, "Phoca vitulina", at_sea(), 0),
        ],
    ));
    let pipeline = test_pipeline(vec![citizen], test_query("Cetacea", Duration::days(1)), TIMEOUT);
    let _handle = pipeline.attach();
    let mut events = pipeline.subscribe();

    assert!(pipeline.query().set_taxon_str("Pinnipedia").unwrap());

    let mut query_changed = None;
    let settled = tokio::time::timeout(StdDuration::from_secs(2), async {
        loop {
            match events.recv().await.unwrap() {
                WhalemapEvent::QueryChanged { field, value, .. } => {
                    query_changed = Some((field, value));
                }
                WhalemapEvent::TravelsChanged { generation, .. } => break generation,
                _ => {}
            }
        }
    })
    .await
    .expect("query change should trigger a generation");

    assert_eq!(settled, 1);
    assert_eq!(
        query_changed,
        Some((QueryField::Taxon, "Pinnipedia".to_string()))
    );
    let published = pipeline.observations().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].taxon.as_deref(), Some("Phoca vitulina"));

    // Equal value: no notification, no new generation
    assert!(!pipeline.query().set_taxon_str("Pinnipedia").unwrap());
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert_eq!(pipeline.current_generation(), 1);
}
