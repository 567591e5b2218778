//! End-to-end pipeline tests: comment event -> keyword match -> dedup gate
//! -> queue -> worker -> dispatcher -> delivery log.

#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use autodm::config::PipelineConfig;
use autodm::db::models::DeliveryStatus;
use autodm::db::sqlite::SqliteDatabase;
use autodm::db::DeliveryLog;
use autodm::dispatch::graph::GraphDispatcher;
use autodm::dispatch::{DispatchError, Dispatcher};
use autodm::pipeline::gate::ABANDONED_AT_SHUTDOWN;
use autodm::pipeline::{self, Admission};
use autodm::webhook::CommentEvent;

/// Records every send and answers with a fixed result.
struct Recording {
    result: Result<(), DispatchError>,
    sends: Mutex<Vec<(String, String)>>,
}

impl Recording {
    fn new(result: Result<(), DispatchError>) -> Arc<Self> {
        Arc::new(Self {
            result,
            sends: Mutex::new(Vec::new()),
        })
    }

    async fn sends(&self) -> Vec<(String, String)> {
        self.sends.lock().await.clone()
    }
}

#[async_trait]
impl Dispatcher for Recording {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<(), DispatchError> {
        self.sends
            .lock()
            .await
            .push((recipient_id.to_string(), text.to_string()));
        self.result.clone()
    }
}

fn config(delay: Duration) -> PipelineConfig {
    PipelineConfig {
        keywords: vec!["dm".to_string()],
        message_template: "Hey {username}, check your inbox".to_string(),
        pre_send_delay: delay,
        max_retries: 3,
        backoff_base: Duration::from_secs(2),
        ..PipelineConfig::default()
    }
}

fn comment(comment_id: &str, author: &str, post: &str, text: &str) -> CommentEvent {
    CommentEvent {
        comment_id: comment_id.to_string(),
        post_id: post.to_string(),
        author_id: author.to_string(),
        author_username: "bob".to_string(),
        text: text.to_string(),
        received_at: Utc::now(),
    }
}

fn memory_log() -> Arc<dyn DeliveryLog> {
    Arc::new(SqliteDatabase::in_memory().unwrap())
}

#[tokio::test(start_paused = true)]
async fn matching_comment_is_delivered_once() {
    let log = memory_log();
    let dispatcher = Recording::new(Ok(()));
    let (pipeline, worker) = pipeline::start(
        &config(Duration::from_secs(60)),
        10,
        log.clone(),
        dispatcher.clone(),
        CancellationToken::new(),
    );

    let event = comment("c1", "123", "p1", "please dm");
    assert_eq!(pipeline.handle_comment(&event).await, Admission::Queued);
    // Replayed webhook delivery
    assert_eq!(pipeline.handle_comment(&event).await, Admission::Duplicate);
    assert_eq!(
        pipeline
            .handle_comment(&comment("c2", "123", "p1", "DM again"))
            .await,
        Admission::Duplicate
    );
    drop(pipeline);

    let summary = worker.await.unwrap();
    assert_eq!(summary.delivered, 1);
    assert_eq!(
        dispatcher.sends().await,
        vec![("123".to_string(), "Hey bob, check your inbox".to_string())]
    );

    let record = log.get_delivery("123", "p1").await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert_eq!(record.retry_count, 0);
    assert_eq!(record.comment_id, "c1");
}

#[tokio::test(start_paused = true)]
async fn non_matching_comment_never_reaches_dispatcher() {
    let log = memory_log();
    let dispatcher = Recording::new(Ok(()));
    let (pipeline, worker) = pipeline::start(
        &config(Duration::ZERO),
        10,
        log.clone(),
        dispatcher.clone(),
        CancellationToken::new(),
    );

    assert_eq!(
        pipeline
            .handle_comment(&comment("c1", "123", "p1", "nice photo"))
            .await,
        Admission::NoMatch
    );
    drop(pipeline);

    let summary = worker.await.unwrap();
    assert_eq!(summary.delivered + summary.failed + summary.abandoned, 0);
    assert!(dispatcher.sends().await.is_empty());
    assert!(log.get_delivery("123", "p1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn expired_window_fails_after_full_retry_budget() {
    let log = memory_log();
    let dispatcher = Recording::new(Err(DispatchError::WindowExpired {
        status: 400,
        message: "outside of allowed window".to_string(),
    }));
    let (pipeline, worker) = pipeline::start(
        &config(Duration::ZERO),
        10,
        log.clone(),
        dispatcher.clone(),
        CancellationToken::new(),
    );

    pipeline
        .handle_comment(&comment("c1", "123", "p1", "dm"))
        .await;
    drop(pipeline);

    let summary = worker.await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(dispatcher.sends().await.len(), 4);

    let record = log.get_delivery("123", "p1").await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.retry_count, 3);
    assert!(record.error_message.unwrap().contains("window"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_undispatched_jobs() {
    let log = memory_log();
    let dispatcher = Recording::new(Ok(()));
    let shutdown = CancellationToken::new();
    let (pipeline, worker) = pipeline::start(
        &config(Duration::from_secs(60)),
        10,
        log.clone(),
        dispatcher.clone(),
        shutdown.clone(),
    );

    pipeline
        .handle_comment(&comment("c1", "1", "p1", "dm"))
        .await;
    pipeline
        .handle_comment(&comment("c2", "2", "p1", "dm"))
        .await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    shutdown.cancel();

    let summary = worker.await.unwrap();
    assert_eq!(summary.abandoned, 2);
    assert!(dispatcher.sends().await.is_empty());

    for user in ["1", "2"] {
        let record = log.get_delivery(user, "p1").await.unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Failed);
    }

    // After shutdown, new comments are dropped and their reservation failed
    assert_eq!(
        pipeline
            .handle_comment(&comment("c3", "3", "p1", "dm"))
            .await,
        Admission::Dropped
    );
    let record = log.get_delivery("3", "p1").await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
}

#[tokio::test]
async fn graph_dispatcher_failure_is_recorded() {
    // Fake messaging endpoint that always reports an expired window
    let app = Router::new().route(
        "/{business_id}/messages",
        post(|| async {
            (
                StatusCode::BAD_REQUEST,
                r#"{"error":{"message":"This message is sent outside of allowed window.","code":10,"error_subcode":2534022}}"#,
            )
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let pipeline_config = PipelineConfig {
        pre_send_delay: Duration::ZERO,
        backoff_base: Duration::from_millis(5),
        access_token: "token".to_string(),
        business_id: "17841400000".to_string(),
        graph_api_url: format!("http://{addr}"),
        rate_limit_per_hour: 0,
        ..config(Duration::ZERO)
    };
    let dispatcher = Arc::new(GraphDispatcher::new(&pipeline_config).unwrap());
    let log = memory_log();
    let (pipeline, worker) = pipeline::start(
        &pipeline_config,
        10,
        log.clone(),
        dispatcher,
        CancellationToken::new(),
    );

    pipeline
        .handle_comment(&comment("c1", "123", "p1", "dm me"))
        .await;
    drop(pipeline);
    assert_eq!(worker.await.unwrap().failed, 1);

    let record = log.get_delivery("123", "p1").await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.retry_count, 3);
    assert!(record
        .error_message
        .unwrap()
        .contains("messaging window expired"));
}

#[tokio::test]
async fn full_throttle_window_does_not_block_shutdown() {
    let app = Router::new().route(
        "/{business_id}/messages",
        post(|| async { (StatusCode::OK, r#"{"recipient_id":"1","message_id":"m1"}"#) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let pipeline_config = PipelineConfig {
        access_token: "token".to_string(),
        business_id: "17841400000".to_string(),
        graph_api_url: format!("http://{addr}"),
        rate_limit_per_hour: 1,
        ..config(Duration::ZERO)
    };
    let dispatcher = Arc::new(GraphDispatcher::new(&pipeline_config).unwrap());
    let log = memory_log();
    let shutdown = CancellationToken::new();
    let (pipeline, worker) = pipeline::start(
        &pipeline_config,
        10,
        log.clone(),
        dispatcher,
        shutdown.clone(),
    );

    pipeline
        .handle_comment(&comment("c1", "1", "p1", "dm"))
        .await;
    pipeline
        .handle_comment(&comment("c2", "2", "p1", "dm"))
        .await;

    // Wait for the first DM to go out; the second then sits on the throttle
    let mut first_sent = false;
    for _ in 0..200 {
        let record = log.get_delivery("1", "p1").await.unwrap();
        if record.is_some_and(|r| r.status == DeliveryStatus::Sent) {
            first_sent = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(first_sent);

    shutdown.cancel();
    let summary = tokio::time::timeout(Duration::from_secs(3), worker)
        .await
        .expect("worker should stop promptly after shutdown")
        .unwrap();
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.abandoned, 1);

    let record = log.get_delivery("2", "p1").await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some(ABANDONED_AT_SHUTDOWN));
}
