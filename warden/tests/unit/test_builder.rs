//! Image builder tests

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_test::{assert_err, assert_ok};

use warden::build::builder::{BuildConfig, BuildStatus, ImageBuildOptions, ImageBuilder};
use warden::build::lock::{BuildLock, MemoryBuildLock};
use warden::errors::WardenError;
use warden::filesys::dir::Dir;
use warden::models::image::ImageNaming;

use crate::fakes::{FakeCheckout, FakeEngine, FakeRegistry, FULL_HASH};

struct Harness {
    engine: Arc<FakeEngine>,
    checkout: Arc<FakeCheckout>,
    registry: Arc<FakeRegistry>,
    lock: Arc<MemoryBuildLock>,
    builder: Arc<ImageBuilder>,
    _work: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_timeouts(Duration::from_secs(60), Duration::from_secs(600))
    }

    fn with_timeouts(build_timeout: Duration, building_ttl: Duration) -> Self {
        let work = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let checkout = Arc::new(FakeCheckout::default());
        let registry = Arc::new(FakeRegistry::default());
        let lock = Arc::new(MemoryBuildLock::new());
        let builder = Arc::new(
            ImageBuilder::new(
                engine.clone(),
                registry.clone(),
                checkout.clone(),
                lock.clone(),
                ImageNaming::new("registry.local", 5000),
                BuildConfig {
                    work_dir: Dir::new(work.path().join("builds")),
                    build_timeout,
                    building_ttl,
                    failed_ttl: Duration::from_secs(86400),
                },
            )
            .unwrap(),
        );
        Self {
            engine,
            checkout,
            registry,
            lock,
            builder,
            _work: work,
        }
    }
}

fn options(hash: &str) -> ImageBuildOptions {
    ImageBuildOptions {
        project: "Demo".to_string(),
        git_url: "https://git.example.com/demo.git".to_string(),
        hash: hash.to_string(),
        username: "ci".to_string(),
        password: None,
        runtime: "python".to_string(),
        handler: "main.handle".to_string(),
        alias: String::new(),
    }
}

async fn finish(status: BuildStatus) {
    match status {
        BuildStatus::Started(handle) => handle.await.unwrap(),
        other => panic!("expected a started build, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_requests_build_once() {
    let h = Harness::new();

    let (first, second) = tokio::join!(
        h.builder.build_image(options("abcdef12")),
        h.builder.build_image(options("abcdef12")),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    let (started, pending) = match (first, second) {
        (BuildStatus::Started(handle), BuildStatus::Pending(record))
        | (BuildStatus::Pending(record), BuildStatus::Started(handle)) => (handle, record),
        other => panic!("expected one started and one pending build, got {:?}", other),
    };
    assert!(pending.contains("Building image"));

    started.await.unwrap();
    assert_eq!(h.checkout.clones.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.builds.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_successful_build_tags_and_clears_record() {
    let h = Harness::new();
    finish(h.builder.build_image(options("ABCDEF12")).await.unwrap()).await;

    let builds = h.engine.builds.lock().unwrap().clone();
    assert_eq!(
        builds,
        vec![vec![
            format!("registry.local:5000/demo:{}", FULL_HASH),
            "registry.local:5000/demo:abcdef12".to_string(),
        ]]
    );
    assert_eq!(h.engine.pushes.lock().unwrap().len(), 2);

    let key = "https://git.example.com/demo.git-abcdef12";
    assert_eq!(h.lock.get(key).await.unwrap(), None);
}

#[tokio::test]
async fn test_latest_is_tagged() {
    let h = Harness::new();
    finish(h.builder.build_image(options("")).await.unwrap()).await;

    let builds = h.engine.builds.lock().unwrap().clone();
    assert_eq!(
        builds[0],
        vec![
            format!("registry.local:5000/demo:{}", FULL_HASH),
            "registry.local:5000/demo:latest".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_existing_image_is_not_rebuilt() {
    let h = Harness::new();
    h.registry.add_tag("demo", FULL_HASH);

    let status = assert_ok!(h.builder.build_image(options("abcdef12")).await);
    assert!(matches!(status, BuildStatus::Exists));
    assert_eq!(h.checkout.clones.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rebuild_after_success_is_a_no_op() {
    let h = Harness::new();
    finish(h.builder.build_image(options("abcdef12")).await.unwrap()).await;

    // The pushed image is now in the registry
    h.registry.add_tag("demo", FULL_HASH);
    let status = h.builder.build_image(options("abcdef12")).await.unwrap();
    assert!(matches!(status, BuildStatus::Exists));
    assert_eq!(h.checkout.clones.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_build_is_recorded() {
    let h = Harness::new();
    h.engine.fail_build.store(true, Ordering::SeqCst);
    finish(h.builder.build_image(options("abcdef12")).await.unwrap()).await;

    let record = h
        .builder
        .status("https://git.example.com/demo.git", "abcdef12")
        .await
        .unwrap()
        .unwrap();
    assert!(record.contains("failed"));
    assert!(record.contains("boom"));

    // A recent failure holds off new attempts until the record expires
    let status = h.builder.build_image(options("abcdef12")).await.unwrap();
    match status {
        BuildStatus::Pending(existing) => assert_eq!(existing, record),
        other => panic!("expected pending, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_commit_is_recorded() {
    let h = Harness::new();
    finish(h.builder.build_image(options("99999999")).await.unwrap()).await;

    let record = h
        .builder
        .status("https://git.example.com/demo.git", "99999999")
        .await
        .unwrap()
        .unwrap();
    assert!(record.contains("could not find commit"));
    assert!(h.engine.builds.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_request_fails_before_any_work() {
    let h = Harness::new();
    let mut bad = options("abcdef12");
    bad.handler = String::new();
    bad.runtime = "cobol".to_string();

    let err = assert_err!(h.builder.build_image(bad).await);
    assert!(matches!(err, WardenError::ValidationError(_)));
    assert_eq!(
        h.lock
            .get("https://git.example.com/demo.git-abcdef12")
            .await
            .unwrap(),
        None
    );
    assert_eq!(h.checkout.clones.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_build_workspace_is_removed() {
    let h = Harness::new();
    finish(h.builder.build_image(options("abcdef12")).await.unwrap()).await;

    let builds_dir = h._work.path().join("builds");
    let leftovers = std::fs::read_dir(&builds_dir).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_build_is_bounded_by_build_timeout() {
    let h = Harness::with_timeouts(Duration::from_millis(300), Duration::from_secs(600));
    h.checkout.extra_clone_ms.store(10_000, Ordering::SeqCst);

    let started = Instant::now();
    finish(h.builder.build_image(options("abcdef12")).await.unwrap()).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    let record = h
        .builder
        .status("https://git.example.com/demo.git", "abcdef12")
        .await
        .unwrap()
        .unwrap();
    assert!(record.contains("timed out"));
    assert!(h.engine.builds.lock().unwrap().is_empty());

    // The abandoned clone does not leave its workspace behind
    let builds_dir = h._work.path().join("builds");
    assert_eq!(std::fs::read_dir(&builds_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn test_building_record_outlives_short_ttl() {
    let h = Harness::with_timeouts(Duration::from_secs(60), Duration::from_millis(100));
    h.checkout.extra_clone_ms.store(60_000, Ordering::SeqCst);

    let status = h.builder.build_image(options("abcdef12")).await.unwrap();
    let handle = match status {
        BuildStatus::Started(handle) => handle,
        other => panic!("expected a started build, got {:?}", other),
    };

    // Past building_ttl but well within build_timeout
    tokio::time::sleep(Duration::from_millis(400)).await;
    let again = h.builder.build_image(options("abcdef12")).await.unwrap();
    assert!(matches!(again, BuildStatus::Pending(_)));
    assert_eq!(h.checkout.clones.load(Ordering::SeqCst), 1);

    handle.abort();
}
