//! Cover harvesting against a mock upstream and a shell cover generator.
#![cfg(unix)]

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{base_config, library, TestProxy, USER_ID};
use serde_json::json;
use vl_core::{Config, ResourceType};
use vl_db::models::MarkSource;
use vl_db::pool::{get_conn, init_memory_pool};
use vl_db::queries::harvests;
use vl_proxy::harvest::{CommandRenderer, HarvestOutcome, Harvester, SkipReason};
use vl_proxy::upstream::UpstreamClient;
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Appends a line to `runs.log` and writes `images/<name>.png`.
const FAKE_COVER_COMMAND: [&str; 3] = [
    "sh",
    "-c",
    "echo run >> runs.log; printf cover > \"images/$0.png\"",
];

fn harvest_config(upstream: &MockServer, dir: &Path) -> Config {
    let mut config = base_config(upstream, dir);
    config.upstream.api_key = Some("secret".into());
    config.harvest.enabled = true;
    config.harvest.sample_size = 2;
    config.harvest.cover_command = FAKE_COVER_COMMAND.iter().map(|s| s.to_string()).collect();
    config
}

fn harvester(config: &Config, store: vl_db::pool::DbPool) -> Harvester {
    Harvester::new(
        config.harvest.clone(),
        UpstreamClient::new(&config.upstream).unwrap(),
        store,
        Arc::new(CommandRenderer::from_config(&config.harvest).unwrap()),
    )
}

async fn mount_library_items(upstream: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/emby/Items"))
        .and(query_param("TagIds", "1234"))
        .and(query_param("EnableImageTypes", "Primary"))
        .and(header("x-emby-token", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Items": [
                {"Id": "11", "ImageTags": {"Primary": "t11"}},
                {"Id": "12", "ImageTags": {"Primary": "t12"}},
                {"Id": "13", "ImageTags": {"Primary": "t13"}},
                {"Id": "14", "ImageTags": {}}
            ],
            "TotalRecordCount": 4
        })))
        .mount(upstream)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/emby/Items/\d+/Images/Primary$"))
        .and(query_param("maxHeight", "600"))
        .and(query_param("maxWidth", "400"))
        .and(query_param("quality", "90"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\xff\xd8\xff\xe0sample".to_vec()))
        .mount(upstream)
        .await;
}

fn run_count(dir: &Path) -> usize {
    std::fs::read_to_string(dir.join("runs.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn concurrent_triggers_generate_one_cover() {
    let upstream = MockServer::start().await;
    mount_library_items(&upstream).await;
    let dir = tempfile::tempdir().unwrap();
    let config = harvest_config(&upstream, dir.path());
    let store = init_memory_pool().unwrap();
    let h = harvester(&config, store.clone());
    let anime = library("Anime", ResourceType::Tag, "1234");

    let (first, second) = tokio::join!(h.run(&anime), h.run(&anime));
    assert_eq!(first.unwrap(), HarvestOutcome::Completed { samples: 2 });
    assert_eq!(second.unwrap(), HarvestOutcome::Skipped(SkipReason::InProgress));

    assert_eq!(run_count(dir.path()), 1);
    assert_eq!(std::fs::read(dir.path().join("images/Anime.png")).unwrap(), b"cover");
    let samples = std::fs::read_dir(dir.path().join("images/Anime")).unwrap().count();
    assert_eq!(samples, 2);
    assert!(dir.path().join("images/Anime/1.jpg").exists());

    let conn = get_conn(&store).unwrap();
    assert!(harvests::is_done(&conn, "Anime").unwrap());
    drop(conn);

    assert_eq!(
        h.run(&anime).await.unwrap(),
        HarvestOutcome::Skipped(SkipReason::AlreadyDone)
    );
    assert_eq!(run_count(dir.path()), 1);
}

#[tokio::test]
async fn missing_cover_is_regenerated() {
    let upstream = MockServer::start().await;
    mount_library_items(&upstream).await;
    let dir = tempfile::tempdir().unwrap();
    let config = harvest_config(&upstream, dir.path());
    let h = harvester(&config, init_memory_pool().unwrap());
    let anime = library("Anime", ResourceType::Tag, "1234");

    assert!(matches!(h.run(&anime).await.unwrap(), HarvestOutcome::Completed { .. }));
    std::fs::remove_file(dir.path().join("images/Anime.png")).unwrap();

    assert!(matches!(h.run(&anime).await.unwrap(), HarvestOutcome::Completed { .. }));
    assert_eq!(run_count(dir.path()), 2);
}

#[tokio::test]
async fn custom_image_and_missing_key_skip_harvest() {
    let upstream = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = harvest_config(&upstream, dir.path());
    let h = harvester(&config, init_memory_pool().unwrap());
    let mut custom = library("Marvel", ResourceType::Collection, "5678");
    custom.image = Some(dir.path().join("marvel.png"));
    assert_eq!(
        h.run(&custom).await.unwrap(),
        HarvestOutcome::Skipped(SkipReason::CustomImage)
    );

    config.upstream.api_key = None;
    let h = harvester(&config, init_memory_pool().unwrap());
    assert_eq!(
        h.run(&library("Anime", ResourceType::Tag, "1234")).await.unwrap(),
        HarvestOutcome::Skipped(SkipReason::NoCredentials)
    );
    assert_eq!(run_count(dir.path()), 0);
}

#[tokio::test]
async fn failed_render_is_not_recorded() {
    let upstream = MockServer::start().await;
    mount_library_items(&upstream).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = harvest_config(&upstream, dir.path());
    config.harvest.cover_command = vec!["false".into()];
    let store = init_memory_pool().unwrap();
    let h = harvester(&config, store.clone());

    let err = h
        .run(&library("Anime", ResourceType::Tag, "1234"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("[cover]"));

    let conn = get_conn(&store).unwrap();
    assert!(!harvests::is_done(&conn, "Anime").unwrap());
}

#[tokio::test]
async fn dot_names_never_touch_files_outside_images_dir() {
    let upstream = MockServer::start().await;
    mount_library_items(&upstream).await;
    let dir = tempfile::tempdir().unwrap();
    let config = harvest_config(&upstream, dir.path());
    std::fs::create_dir_all(dir.path().join("images")).unwrap();
    std::fs::write(dir.path().join("precious.db"), b"state").unwrap();
    std::fs::write(dir.path().join("images/Other.png"), b"cover").unwrap();
    let h = harvester(&config, init_memory_pool().unwrap());

    for name in ["..", "."] {
        let err = h
            .run(&library(name, ResourceType::Tag, "1234"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("[download]"), "{name}: {err}");
    }

    assert!(dir.path().join("precious.db").exists());
    assert!(dir.path().join("images/Other.png").exists());
    assert_eq!(run_count(dir.path()), 0);
}

#[tokio::test]
async fn library_without_images_is_skipped() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/emby/Items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Items": []})))
        .mount(&upstream)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let config = harvest_config(&upstream, dir.path());
    let h = harvester(&config, init_memory_pool().unwrap());

    assert_eq!(
        h.run(&library("Anime", ResourceType::Tag, "1234")).await.unwrap(),
        HarvestOutcome::Skipped(SkipReason::Empty)
    );
}

#[tokio::test]
async fn legacy_log_is_imported_once() {
    let upstream = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = harvest_config(&upstream, dir.path());
    let log = dir.path().join("image_done.txt");
    std::fs::write(&log, "Anime\n\nMarvel\n").unwrap();
    config.harvest.legacy_done_log = Some(log);

    let store = vl_proxy::open_store(&config).unwrap();
    let conn = get_conn(&store).unwrap();
    let marks = harvests::list_marks(&conn).unwrap();
    assert_eq!(marks.len(), 2);
    assert!(marks.iter().all(|m| m.source == MarkSource::Legacy));
    drop(conn);
    drop(store);

    let store = vl_proxy::open_store(&config).unwrap();
    let conn = get_conn(&store).unwrap();
    assert_eq!(harvests::list_marks(&conn).unwrap().len(), 2);
    drop(conn);

    // A legacy mark only counts once the cover is actually on disk.
    std::fs::create_dir_all(dir.path().join("images")).unwrap();
    std::fs::write(dir.path().join("images/Anime.png"), b"old cover").unwrap();
    let h = harvester(&config, store);
    assert_eq!(
        h.run(&library("Anime", ResourceType::Tag, "1234")).await.unwrap(),
        HarvestOutcome::Skipped(SkipReason::AlreadyDone)
    );
}

#[tokio::test]
async fn serving_views_triggers_background_harvest() {
    let proxy = TestProxy::start_with(
        |cfg| {
            cfg.upstream.api_key = Some("secret".into());
            cfg.harvest.enabled = true;
            cfg.harvest.cover_command = FAKE_COVER_COMMAND.iter().map(|s| s.to_string()).collect();
            cfg.libraries.truncate(1);
        },
        |_| Some(init_memory_pool().unwrap()),
    )
    .await;
    mount_library_items(&proxy.upstream).await;
    Mock::given(method("GET"))
        .and(path(format!("/emby/Users/{USER_ID}/Views")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Items": []})))
        .mount(&proxy.upstream)
        .await;

    let response = proxy
        .client
        .get(proxy.url(&format!("/emby/Users/{USER_ID}/Views")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let cover = proxy.dir.path().join("images/Anime.png");
    let mut waited = Duration::ZERO;
    while !cover.exists() && waited < Duration::from_secs(10) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    assert!(cover.exists(), "cover was not generated in the background");
}
