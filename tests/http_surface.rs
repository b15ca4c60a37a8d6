//! Router tests that need no database: the pool is lazy and never touched
//! on these paths.

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use fanboard::{
    config::Config,
    db::Database,
    feed::{ChangeKind, Record},
    models::Reaction,
    storage::{BlobStore, FsBlobStore},
    AppState,
};
use futures::StreamExt;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

async fn app() -> (Router, AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_lazy("postgres://fanboard@localhost/unused")
        .unwrap();
    let blobs = Arc::new(FsBlobStore::new(dir.path()).await.unwrap());
    let state = AppState::new(Database::new(pool), Arc::new(Config::with_database_url("unused")), blobs);
    (fanboard::router(state.clone()), state, dir)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_ok_with_security_headers() {
    let (app, _, _dir) = app().await;
    let response = app.oneshot(Request::get("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    let bytes = to_bytes(response.into_body(), 64).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn stored_file_is_served_with_type() {
    let (app, state, _dir) = app().await;
    state.blobs.put("abc-cover.png", b"\x89PNG").await.unwrap();

    let response = app.oneshot(Request::get("/file/abc-cover.png").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert!(response.headers()[header::CACHE_CONTROL].to_str().unwrap().contains("immutable"));
    let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&bytes[..], b"\x89PNG");
}

#[tokio::test]
async fn missing_file_is_not_found() {
    let (app, _, _dir) = app().await;
    let response = app.oneshot(Request::get("/file/nope.png").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"]["code"], "not_found");
}

#[tokio::test]
async fn dotted_file_name_is_rejected() {
    let (app, _, _dir) = app().await;
    let response = app.oneshot(Request::get("/file/..secret").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_requires_a_token() {
    let (app, _, _dir) = app().await;
    let request = Request::post("/upload")
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=x")
        .body(Body::from("--x--\r\n"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn foreign_token_format_is_rejected() {
    let (app, _, _dir) = app().await;
    let request = Request::post("/functions/v1/send-email")
        .header(header::AUTHORIZATION, "Bearer sk_live_nothing")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn realtime_rejects_unknown_tables() {
    let (app, _, _dir) = app().await;
    let response = app
        .oneshot(Request::get("/api/v1/realtime?tables=users").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn realtime_replays_after_last_event_id() {
    let (app, state, _dir) = app().await;
    let board_id = Uuid::new_v4();
    let post_id = Uuid::new_v4();
    for _ in 0..3 {
        state.feed.publish(
            ChangeKind::Insert,
            board_id,
            Some(post_id),
            None,
            Record::Reactions(Reaction {
                post_id,
                user_id: Uuid::new_v4(),
                reaction_type: "like".into(),
                created_at: chrono::Utc::now(),
            }),
        );
    }

    let epoch = state.feed.epoch();
    let request = Request::get(format!("/api/v1/realtime?board_id={board_id}"))
        .header("last-event-id", format!("{epoch}:1"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let mut seen = String::new();
    while !seen.contains(&format!("id:{epoch}:3\n")) {
        let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .expect("replayed events within timeout")
            .expect("stream still open")
            .unwrap();
        seen.push_str(&String::from_utf8_lossy(&chunk).replace(": ", ":"));
    }
    assert!(seen.contains("event:change"));
    assert!(seen.contains(&format!("id:{epoch}:2\n")));
    assert!(!seen.contains(&format!("id:{epoch}:1\n")));
    assert!(!seen.contains("event:resync"));
}

#[tokio::test]
async fn realtime_id_from_another_process_gets_resync() {
    let (app, _, _dir) = app().await;
    let request = Request::get("/api/v1/realtime")
        .header("last-event-id", "500")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .expect("resync within timeout")
        .expect("stream still open")
        .unwrap();
    assert!(String::from_utf8_lossy(&chunk).replace(": ", ":").contains("event:resync"));
}
