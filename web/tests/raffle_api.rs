//! HTTP tests for the raffle routes against the in-memory store.

#![allow(clippy::unwrap_used)]

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use raffle_core::change::ChangeKind;
use raffle_core::entry::EntryId;
use raffle_core::entry_store::EntryStore;
use raffle_testing::{InMemoryEntryStore, test_clock};
use raffle_web::handlers::raffle::EntryView;
use raffle_web::{AppState, REQUEST_ID_HEADER, router};
use serde_json::Value;
use std::sync::Arc;

fn server() -> (TestServer, InMemoryEntryStore) {
    let store = InMemoryEntryStore::new();
    let state = AppState::new(Arc::new(store.clone()), Arc::new(test_clock()));
    (TestServer::new(router(state)).unwrap(), store)
}

#[tokio::test]
async fn submission_creates_an_undecided_entry() {
    let (server, store) = server();

    let response = server.get("/raffle").add_query_param("name", "Ada").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["name"], "Ada");
    assert_eq!(body["timestamp"], "2025-01-01T00:00:00Z");
    assert!(body.get("winner").is_none());

    let id = EntryId::new(body["id"].as_str().unwrap());
    let stored = store.entry(&id).unwrap();
    assert_eq!(stored.winner, None);
    assert_eq!(store.changes().last().map(|c| c.kind), Some(ChangeKind::Create));
}

#[tokio::test]
async fn submissions_get_distinct_ids() {
    let (server, store) = server();

    let a: Value = server.get("/raffle").add_query_param("name", "Ada").await.json();
    let b: Value = server.get("/raffle").add_query_param("name", "Ada").await.json();

    assert_ne!(a["id"], b["id"]);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn missing_name_is_rejected() {
    let (server, store) = server();

    server.get("/raffle").await.assert_status(StatusCode::BAD_REQUEST);
    server
        .get("/raffle")
        .add_query_param("name", "   ")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert!(store.is_empty());
}

#[tokio::test]
async fn lookup_reports_winner_once_decided() {
    let (server, store) = server();
    let created: Value = server.get("/raffle").add_query_param("name", "Ada").await.json();
    let id = created["id"].as_str().unwrap().to_string();

    let before: EntryView = server.get(&format!("/raffle/{id}")).await.json();
    assert_eq!(before.winner, None);

    store.update_winner(&EntryId::new(id.clone()), true).await.unwrap();

    let after: EntryView = server.get(&format!("/raffle/{id}")).await.json();
    assert_eq!(after.winner, Some(true));
    assert_eq!(after.name, "Ada");
}

#[tokio::test]
async fn undecided_lookup_serializes_null_winner() {
    let (server, _store) = server();
    let created: Value = server.get("/raffle").add_query_param("name", "Ada").await.json();

    let body: Value = server
        .get(&format!("/raffle/{}", created["id"].as_str().unwrap()))
        .await
        .json();

    assert_eq!(body["winner"], Value::Null);
}

#[tokio::test]
async fn unknown_entry_is_404() {
    let (server, _store) = server();

    let response = server.get("/raffle/does-not-exist").await;

    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn throttled_store_is_503() {
    let (server, store) = server();
    store.fail_next_reads(1);

    server
        .get("/raffle/anything")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn health_is_ok_and_echoes_request_id() {
    let (server, _store) = server();
    let request_id = "6f9619ff-8b86-d011-b42d-00c04fc964ff";

    let response = server
        .get("/health")
        .add_header(HeaderName::from_static(REQUEST_ID_HEADER), HeaderValue::from_static(request_id))
        .await;

    response.assert_status_ok();
    response.assert_text("ok");
    assert_eq!(response.header(HeaderName::from_static(REQUEST_ID_HEADER)), request_id);
}
