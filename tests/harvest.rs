//! End-to-end stage runs against recorded upstream replies.

use std::sync::Arc;

use harvester::error::AppError;
use harvester::models::{Config, EntityId, PacingConfig, PauseRange, Record};
use harvester::pipeline::{self, Harvest};
use harvester::services::{Matcher, ReplayTransport, Reply};
use harvester::storage::{LocalStorage, SnapshotStorage};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const API: &str = "api.test/web/api";
const ENHANCED: &str = "enhanced.test/apidata/web";
const STATIC: &str = "static.test/www/2.0";

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.http.api_url = format!("https://{API}/");
    config.http.enhanced_url = format!("https://{ENHANCED}");
    config.http.static_url = format!("https://{STATIC}");
    config.retry.base_delay_ms = 1;
    config.retry.max_attempts = 2;
    config.retry.score_attempts = 2;
    config.backoff.floor_ms = 1;
    config.backoff.ceiling_ms = 4;
    config.backoff.jitter_ratio = 0.0;
    config.pacing = PacingConfig::none();
    config.harvest.max_pages = 5;
    config.harvest.score_years = vec!["2024".into()];
    config.harvest.plan_years = vec!["2024".into()];
    config.paths.output_dir = dir.path().to_path_buf();
    config
}

fn setup(config: Config, transport: &Arc<ReplayTransport>) -> (Harvest, Arc<LocalStorage>) {
    let storage = Arc::new(LocalStorage::new(&config.paths.output_dir));
    let harvest = Harvest::new(
        config,
        transport.clone(),
        storage.clone(),
        CancellationToken::new(),
    )
    .unwrap();
    (harvest, storage)
}

fn ok(data: serde_json::Value) -> Reply {
    Reply::json(json!({"code": "0000", "message": "成功", "data": data}))
}

async fn seed_schools(storage: &LocalStorage, ids: &[u64]) {
    let records: Vec<Record> = ids
        .iter()
        .map(|id| {
            let mut record = Record::new();
            record.insert("school_id", *id);
            record
        })
        .collect();
    storage
        .write_snapshot(pipeline::SCHOOLS_FILE, &records)
        .await
        .unwrap();
}

#[tokio::test]
async fn schools_stage_merges_listing_detail_and_enhanced() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ReplayTransport::new());
    transport
        .add(
            Matcher::url(API)
                .param("uri", "apidata/api/gkv3/school/lists")
                .param("page", 1),
            ok(json!({"item": [
                {"school_id": 31, "name": "北京大学", "province_name": "北京", "f985": 1},
                {"school_id": 32, "name": "清华大学", "province_name": "北京"}
            ], "numFound": 2})),
        )
        .add(
            Matcher::url(API)
                .param("uri", "apidata/api/gkv3/school/lists")
                .param("page", 2),
            ok(json!({"item": []})),
        )
        .add(
            Matcher::url(API)
                .param("uri", "apidata/api/gkv3/school/detail")
                .param("school_id", 31),
            ok(json!({"school_id": "31", "site": "https://www.pku.edu.cn", "address": "北京市海淀区", "phone": ""})),
        )
        .add(
            Matcher::url(ENHANCED).param("page", 1),
            ok(json!({"item": [
                {"school_id": "31", "is_top": 1, "label_list": ["双一流"]},
                {"school_id": "99", "is_top": 0}
            ]})),
        )
        .add(Matcher::url(ENHANCED).param("page", 2), ok(json!({"item": []})));

    let (harvest, storage) = setup(test_config(&dir), &transport);
    let report = pipeline::run_schools(&harvest).await.unwrap();
    assert_eq!(report.records, 2);
    assert_eq!(report.failures, 0);

    let snapshot = storage
        .read_snapshot(pipeline::SCHOOLS_FILE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.count, 2);
    assert!(!snapshot.update_time.is_empty());

    let pku = &snapshot.data[0];
    assert_eq!(pku.id("school_id"), Some(EntityId::new("31")));
    assert_eq!(pku.str("name"), Some("北京大学"));
    assert_eq!(pku.str("website"), Some("https://www.pku.edu.cn"));
    assert_eq!(pku.str("address"), Some("北京市海淀区"));
    assert_eq!(pku.value("is_top"), Some(&json!(1)));

    let thu = &snapshot.data[1];
    assert_eq!(thu.str("name"), Some("清华大学"));
    assert!(thu.get("website").is_none_or(|f| f.is_unknown()));

    let enhanced = transport
        .requests()
        .into_iter()
        .find(|r| r.url.contains(ENHANCED))
        .unwrap();
    assert_eq!(enhanced.param("platform").as_deref(), Some("2"));
    assert_eq!(enhanced.param("signsafe").as_deref(), Some(""));
    assert_eq!(
        enhanced.query.last().map(|(k, _)| k.as_str()),
        Some("signsafe")
    );
}

#[tokio::test]
async fn failed_school_listing_fails_the_stage_but_writes_snapshot() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ReplayTransport::new());
    transport.add(Matcher::url(API), Reply::status(500));

    let (harvest, storage) = setup(test_config(&dir), &transport);
    let err = pipeline::run_schools(&harvest).await.unwrap_err();
    assert!(matches!(err, AppError::Stage { .. }));

    let snapshot = storage
        .read_snapshot(pipeline::SCHOOLS_FILE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.count, 0);
    assert_eq!(transport.count(ENHANCED), 0);
}

#[tokio::test]
async fn majors_fall_back_to_alternate_payload() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ReplayTransport::new());
    transport
        .add(
            Matcher::url(API)
                .param("uri", "apidata/api/gk/special/page")
                .param("page", 1),
            ok(json!({"item": [
                {"special_id": 1, "spcode": "080901", "special_name": "计算机科学与技术", "limit_year": "四年"},
                {"id": 2, "code": "070101", "name": "数学与应用数学"}
            ]})),
        )
        .add(
            Matcher::url(API)
                .param("uri", "apidata/api/gk/special/page")
                .param("page", 2),
            ok(json!({"item": []})),
        );

    let (harvest, storage) = setup(test_config(&dir), &transport);
    let report = pipeline::run_majors(&harvest).await.unwrap();
    assert_eq!(report.records, 2);

    let snapshot = storage
        .read_snapshot(pipeline::MAJORS_FILE)
        .await
        .unwrap()
        .unwrap();
    let cs = &snapshot.data[0];
    assert_eq!(cs.str("code"), Some("080901"));
    assert_eq!(cs.str("name"), Some("计算机科学与技术"));
    assert_eq!(cs.str("years"), Some("四年"));
    assert_eq!(snapshot.data[1].value("special_id"), Some(&json!(2)));
}

#[tokio::test]
async fn downstream_stages_skip_without_school_snapshot() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ReplayTransport::new());
    let (harvest, storage) = setup(test_config(&dir), &transport);

    assert!(pipeline::run_scores(&harvest).await.unwrap().skipped);
    assert!(pipeline::run_school_scores(&harvest).await.unwrap().skipped);
    assert!(pipeline::run_plans(&harvest).await.unwrap().skipped);

    assert!(transport.requests().is_empty());
    assert!(
        storage
            .read_snapshot(pipeline::SCORES_FILE)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn scores_keep_going_past_a_throttled_school() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ReplayTransport::new());
    let scoreline = "apidata/api/gkv3/school/scoreline";
    transport
        .add(
            Matcher::url(API).param("uri", scoreline).param("school_id", 31),
            ok(json!({"item": [
                {"local_province_name": "北京", "local_batch_name": "本科批", "min": 680, "min_section": 120}
            ]})),
        )
        .add(
            Matcher::url(API).param("uri", scoreline).param("school_id", 32),
            Reply::json(json!({"code": "1069", "message": "访问太过频繁"})),
        );

    let (harvest, storage) = setup(test_config(&dir), &transport);
    seed_schools(&storage, &[31, 32]).await;

    let report = pipeline::run_scores(&harvest).await.unwrap();
    assert_eq!(report.requests, 2);
    assert_eq!(report.failures, 1);
    assert_eq!(harvest.engine().stats().rate_limit_signals, 2);

    let snapshot = storage
        .read_snapshot(pipeline::SCORES_FILE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.count, 1);
    let line = &snapshot.data[0];
    assert_eq!(line.value("school_id"), Some(&json!(31)));
    assert_eq!(line.str("year"), Some("2024"));
    assert_eq!(line.str("province"), Some("北京"));
    assert_eq!(line.value("min_score"), Some(&json!(680)));
}

#[tokio::test]
async fn plans_skip_provinces_without_documents() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ReplayTransport::new());
    transport.add(
        Matcher::url(format!("{STATIC}/schoolspecialplan/31/2024/11.json")),
        ok(json!({"普通类": {"item": [
            {"sp_name": "计算机科学与技术", "spcode": "080901", "num": 5, "local_batch_name": "本科批"}
        ]}})),
    );

    let mut config = test_config(&dir);
    config.harvest.plan_province_ids = vec!["11".into(), "44".into()];
    let (harvest, storage) = setup(config, &transport);
    seed_schools(&storage, &[31]).await;

    let report = pipeline::run_plans(&harvest).await.unwrap();
    assert_eq!(report.requests, 2);
    assert_eq!(report.failures, 0);
    assert_eq!(transport.count("schoolspecialplan"), 2);

    let snapshot = storage
        .read_snapshot(pipeline::PLANS_FILE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.count, 1);
    let plan = &snapshot.data[0];
    assert_eq!(plan.str("province"), Some("北京"));
    assert_eq!(plan.str("plan_type"), Some("普通类"));
    assert_eq!(plan.value("plan_number"), Some(&json!(5)));
}

#[tokio::test]
async fn school_scores_fail_when_every_request_fails() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ReplayTransport::new());
    transport.add(Matcher::url(STATIC), Reply::status(503));

    let (harvest, storage) = setup(test_config(&dir), &transport);
    seed_schools(&storage, &[31, 32]).await;

    let err = pipeline::run_school_scores(&harvest).await.unwrap_err();
    assert!(matches!(err, AppError::Stage { .. }));
    // two schools, two attempts each
    assert_eq!(transport.count(STATIC), 4);

    let snapshot = storage
        .read_snapshot(pipeline::SCHOOL_SCORES_FILE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.count, 0);
}

#[tokio::test]
async fn cancelled_run_stops_before_sending() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ReplayTransport::new());
    let config = test_config(&dir);
    let storage = Arc::new(LocalStorage::new(&config.paths.output_dir));
    seed_schools(&storage, &[31, 32]).await;

    let cancel = CancellationToken::new();
    let harvest = Harvest::new(
        config,
        transport.clone(),
        storage.clone(),
        cancel.clone(),
    )
    .unwrap();
    cancel.cancel();

    let err = pipeline::run_scores(&harvest).await.unwrap_err();
    assert!(matches!(err, AppError::Stage { .. }));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn malformed_school_entries_are_skipped() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(pipeline::SCHOOLS_FILE),
        r#"{"data": [{"school_id": 31}, "junk", {"name": "no id"}]}"#,
    )
    .unwrap();
    let transport = Arc::new(ReplayTransport::new());
    transport.add(
        Matcher::url(API)
            .param("uri", "apidata/api/gkv3/school/scoreline")
            .param("school_id", 31),
        ok(json!({"item": [{"local_province_name": "北京", "min": 680}]})),
    );

    let (harvest, storage) = setup(test_config(&dir), &transport);
    let report = pipeline::run_scores(&harvest).await.unwrap();
    assert!(!report.skipped);
    assert_eq!(report.requests, 1);

    let snapshot = storage
        .read_snapshot(pipeline::SCORES_FILE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.count, 1);
    assert_eq!(snapshot.data[0].value("school_id"), Some(&json!(31)));
}

#[tokio::test]
async fn unreadable_school_snapshot_skips_stage() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(pipeline::SCHOOLS_FILE), "{not json").unwrap();
    let transport = Arc::new(ReplayTransport::new());

    let (harvest, _storage) = setup(test_config(&dir), &transport);
    assert!(pipeline::run_plans(&harvest).await.unwrap().skipped);
    assert!(transport.requests().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_out_keeps_school_order() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ReplayTransport::new());
    let ids = [31u64, 32, 33, 34, 35, 36, 37];
    for id in ids {
        transport.add(
            Matcher::url(format!("{STATIC}/school/{id}/info.json")),
            ok(json!({
                "name": format!("school {id}"),
                "province_score_min": {"11": {"type": "2", "min": 600 + id, "year": 2024}}
            })),
        );
    }

    let mut config = test_config(&dir);
    config.harvest.concurrency = 4;
    let (harvest, storage) = setup(config, &transport);
    seed_schools(&storage, &ids).await;

    let report = pipeline::run_school_scores(&harvest).await.unwrap();
    assert_eq!(report.records, ids.len());

    let snapshot = storage
        .read_snapshot(pipeline::SCHOOL_SCORES_FILE)
        .await
        .unwrap()
        .unwrap();
    let order: Vec<_> = snapshot
        .data
        .iter()
        .map(|r| r.value("school_id").cloned())
        .collect();
    let expected: Vec<_> = ids.iter().map(|id| Some(json!(id))).collect();
    assert_eq!(order, expected);
}

#[tokio::test]
async fn cancel_during_school_pause_fails_stage_and_keeps_results() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ReplayTransport::new());
    transport.add(
        Matcher::url(API)
            .param("uri", "apidata/api/gkv3/school/scoreline")
            .param("school_id", 31),
        ok(json!({"item": [{"local_province_name": "北京", "min": 680}]})),
    );

    let mut config = test_config(&dir);
    config.pacing.score_school = PauseRange::millis(60_000, 60_000);
    let storage = Arc::new(LocalStorage::new(&config.paths.output_dir));
    seed_schools(&storage, &[31, 32]).await;

    let cancel = CancellationToken::new();
    let harvest = Harvest::new(
        config,
        transport.clone(),
        storage.clone(),
        cancel.clone(),
    )
    .unwrap();
    let trigger = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let err = pipeline::run_scores(&harvest).await.unwrap_err();
    trigger.await.unwrap();
    assert!(matches!(err, AppError::Stage { .. }));
    assert!(started.elapsed() < std::time::Duration::from_secs(30));
    assert_eq!(transport.count(API), 1);

    let snapshot = storage
        .read_snapshot(pipeline::SCORES_FILE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.count, 1);
}
