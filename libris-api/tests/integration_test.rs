use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use libris_api::{app, auth::Claims, AppState, AuthConfig};
use libris_core::LibraryRules;
use libris_shared::Role;
use libris_store::MemoryStore;
use mockable::Clock;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;

const SECRET: &str = "integration-secret";

const ADMIN: i64 = 1;
const STUDENT1: i64 = 2;
const STUDENT2: i64 = 3;
const STUDENT3: i64 = 4;
const FACULTY1: i64 = 7;

/// Test clock the scenarios move forward by hand.
struct TestClock(Mutex<DateTime<Utc>>);

impl TestClock {
    fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for TestClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap()
}

async fn seeded_state() -> (AppState, Arc<TestClock>) {
    let store = Arc::new(MemoryStore::seeded().await.unwrap());
    let clock = Arc::new(TestClock(Mutex::new(t0())));
    let state = AppState::new(
        store.clone(),
        store.clone(),
        store,
        LibraryRules::default(),
        clock.clone(),
        AuthConfig {
            secret: SECRET.to_string(),
        },
    );
    (state, clock)
}

async fn harness() -> (Router, Arc<TestClock>) {
    let (state, clock) = seeded_state().await;
    (app(state), clock)
}

fn token(user_id: i64, role: Role) -> String {
    // `exp` is validated against the real clock, not the test clock.
    let claims = Claims {
        sub: user_id,
        role,
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let body = body.map(|body| serde_json::to_vec(&body).unwrap());
    send_raw(app, method, uri, token, body).await
}

/// Like [`send`], for bodies that are not valid JSON.
async fn send_raw(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Vec<u8>>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (app, _) = harness().await;
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_requests_without_valid_token_are_rejected() {
    let (app, _) = harness().await;

    let (status, body) = send(&app, "GET", "/api/slots", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, "GET", "/api/slots", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_slot_listing_is_ordered_by_zone_then_name() {
    let (app, _) = harness().await;
    let student = token(STUDENT1, Role::Student);

    let (status, body) = send(&app, "GET", "/api/slots", Some(&student), None).await;

    assert_eq!(status, StatusCode::OK);
    let slots = body.as_array().unwrap();
    assert_eq!(slots.len(), 46);
    assert_eq!(slots[0]["zone"], "Discussion Area");
    assert_eq!(slots[0]["name"], "Room 1");
    assert!(slots.iter().all(|s| s["status"] == "free"));
}

#[tokio::test]
async fn test_booking_rules() {
    let (app, _) = harness().await;
    let student1 = token(STUDENT1, Role::Student);
    let student2 = token(STUDENT2, Role::Student);
    let admin = token(ADMIN, Role::Admin);

    let (status, body) = send(&app, "POST", "/api/slots/book", Some(&student1), Some(json!({ "slot_id": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Slot booked successfully");

    let (status, body) = send(&app, "POST", "/api/slots/book", Some(&student2), Some(json!({ "slotId": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Slot already booked");

    let (status, body) = send(&app, "POST", "/api/slots/book", Some(&student1), Some(json!({ "slot_id": 2 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "You already have an active seat booking. Please end your current session first."
    );

    let (status, body) = send(&app, "POST", "/api/slots/book", Some(&student2), Some(json!({ "slot_id": 999 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Slot not found");

    let (status, _) = send(&app, "POST", "/api/slots/book", Some(&admin), Some(json!({ "slot_id": 3 }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Only the holder can end the session.
    let (status, body) = send(&app, "POST", "/api/slots/end", Some(&student2), Some(json!({ "slot_id": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Slot not booked by you or already free");

    let (status, _) = send(&app, "POST", "/api/slots/end", Some(&student1), Some(json!({ "slot_id": 1 }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "POST", "/api/slots/book", Some(&student1), Some(json!({ "slot_id": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_simulated_leave_frees_any_slot() {
    let (app, _) = harness().await;
    let student1 = token(STUDENT1, Role::Student);
    let faculty = token(FACULTY1, Role::Faculty);

    send(&app, "POST", "/api/slots/book", Some(&student1), Some(json!({ "slot_id": 5 }))).await;

    let (status, body) = send(&app, "POST", "/api/slots/simulate-leave", Some(&faculty), Some(json!({ "slot_id": 5 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Slot freed (simulated)");

    let (status, _) = send(&app, "POST", "/api/slots/simulate-leave", Some(&faculty), Some(json!({ "slot_id": 500 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_listing_expires_sessions_past_four_hours() {
    let (app, clock) = harness().await;
    let student1 = token(STUDENT1, Role::Student);

    send(&app, "POST", "/api/slots/book", Some(&student1), Some(json!({ "slot_id": 1 }))).await;

    clock.advance(Duration::hours(3) + Duration::minutes(59));
    let (_, body) = send(&app, "GET", "/api/slots", Some(&student1), None).await;
    let held = body.as_array().unwrap().iter().find(|s| s["id"] == 1).unwrap().clone();
    assert_eq!(held["status"], "booked");
    assert_eq!(held["booked_by_user_id"], STUDENT1);

    clock.advance(Duration::minutes(1));
    let (_, body) = send(&app, "GET", "/api/slots", Some(&student1), None).await;
    let freed = body.as_array().unwrap().iter().find(|s| s["id"] == 1).unwrap().clone();
    assert_eq!(freed["status"], "free");
    assert!(freed["booking_start_time"].is_null());

    let (status, _) = send(&app, "POST", "/api/slots/book", Some(&student1), Some(json!({ "slot_id": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_late_return_is_fined_per_started_day() {
    let (app, clock) = harness().await;
    let student1 = token(STUDENT1, Role::Student);

    let (status, body) = send(&app, "POST", "/api/books/borrow", Some(&student1), Some(json!({ "book_id": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Book borrowed successfully");

    let (status, body) = send(&app, "POST", "/api/books/borrow", Some(&token(STUDENT2, Role::Student)), Some(json!({ "book_id": 2 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Book already borrowed");

    // Ten days in: three days past due, still accruing.
    clock.advance(Duration::days(10));
    let (_, body) = send(&app, "GET", "/api/users/history", Some(&student1), None).await;
    assert_eq!(body[0]["fine"], 300);
    assert_eq!(body[0]["accruing"], true);

    clock.advance(Duration::hours(1));
    let (status, body) = send(&app, "POST", "/api/books/return", Some(&student1), Some(json!({ "bookId": 2 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fine"]["amount"], 400);
    assert_eq!(body["fine"]["days_overdue"], 4);
    assert_eq!(body["message"], "Book returned. Fine charged: 400 (4 days overdue)");

    // Settled fines do not move.
    clock.advance(Duration::days(30));
    let (_, body) = send(&app, "GET", "/api/users/history", Some(&student1), None).await;
    assert_eq!(body[0]["fine"], 400);
    assert_eq!(body[0]["accruing"], false);
    assert_eq!(body[0]["status"], "returned");
    assert_eq!(body[0]["title"], "1984");

    let (status, body) = send(&app, "POST", "/api/books/return", Some(&student1), Some(json!({ "book_id": 2 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No active borrow record found");
}

#[tokio::test]
async fn test_catalogue_management_is_admin_only() {
    let (app, _) = harness().await;
    let admin = token(ADMIN, Role::Admin);
    let student1 = token(STUDENT1, Role::Student);
    let new_book = json!({ "title": "Dune", "author": "Frank Herbert", "floor": 3, "shelf": "C4" });

    let (status, _) = send(&app, "POST", "/api/books", Some(&student1), Some(new_book.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "POST", "/api/books", Some(&admin), Some(new_book)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Book added");
    let id = body["id"].as_i64().unwrap();

    let (_, hits) = send(&app, "GET", "/api/books/search?query=herbert", Some(&student1), None).await;
    assert_eq!(hits.as_array().unwrap().len(), 1);
    assert_eq!(hits[0]["location"]["shelf"], "C4");

    send(&app, "POST", "/api/books/borrow", Some(&student1), Some(json!({ "book_id": id }))).await;
    let (_, hits) = send(&app, "GET", "/api/books/search?query=dune", Some(&student1), None).await;
    assert_eq!(hits[0]["status"], "borrowed");
    assert_eq!(hits[0]["borrowed_by"], STUDENT1);

    let (status, body) = send(&app, "DELETE", &format!("/api/books/{}", id), Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot delete a borrowed book");

    send(&app, "POST", "/api/books/return", Some(&student1), Some(json!({ "book_id": id }))).await;
    let (status, _) = send(&app, "DELETE", &format!("/api/books/{}", id), Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "DELETE", &format!("/api/books/{}", id), Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Book not found");
}

#[tokio::test]
async fn test_all_transactions_lists_borrowers_for_admin() {
    let (app, clock) = harness().await;
    let admin = token(ADMIN, Role::Admin);
    let student1 = token(STUDENT1, Role::Student);
    let faculty = token(FACULTY1, Role::Faculty);

    send(&app, "POST", "/api/books/borrow", Some(&student1), Some(json!({ "book_id": 1 }))).await;
    clock.advance(Duration::minutes(5));
    send(&app, "POST", "/api/books/borrow", Some(&faculty), Some(json!({ "book_id": 3 }))).await;

    let (status, _) = send(&app, "GET", "/api/users/all-transactions", Some(&student1), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "GET", "/api/users/all-transactions", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["username"], "faculty1");
    assert_eq!(rows[0]["role"], "faculty");
    assert_eq!(rows[1]["username"], "student1");

    // Personal history carries no borrower columns.
    let (_, body) = send(&app, "GET", "/api/users/history", Some(&student1), None).await;
    assert!(body[0].get("username").is_none());
}

#[tokio::test]
async fn test_malformed_requests_get_json_errors() {
    let (app, _) = harness().await;
    let student1 = token(STUDENT1, Role::Student);
    let admin = token(ADMIN, Role::Admin);

    // Wrong field name.
    let (status, body) = send(&app, "POST", "/api/slots/book", Some(&student1), Some(json!({ "slot": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("slot_id"));

    // Wrong type.
    let (status, body) = send(&app, "POST", "/api/books/borrow", Some(&student1), Some(json!({ "book_id": "one" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    // Not JSON at all.
    let (status, body) = send_raw(&app, "POST", "/api/slots/end", Some(&student1), Some(b"{slot_id:".to_vec())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    // Non-numeric path segment.
    let (status, body) = send(&app, "DELETE", "/api/books/abc", Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(&app, "DELETE", "/api/users/abc", Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_admin_lists_users() {
    let (app, _) = harness().await;

    let (status, _) = send(&app, "GET", "/api/users/all", Some(&token(STUDENT1, Role::Student)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "GET", "/api/users/all", Some(&token(ADMIN, Role::Admin)), None).await;
    assert_eq!(status, StatusCode::OK);
    let users = body.as_array().unwrap();
    assert_eq!(users.len(), 9);
    assert!(users.iter().any(|u| u["username"] == "faculty3" && u["role"] == "faculty"));
    assert!(users.iter().all(|u| u["created_at"].is_string() && u.get("password").is_none()));
}

#[tokio::test]
async fn test_user_deletion_rules() {
    let (app, _) = harness().await;
    let admin = token(ADMIN, Role::Admin);
    let student1 = token(STUDENT1, Role::Student);

    let (status, _) = send(&app, "DELETE", &format!("/api/users/{}", STUDENT2), Some(&student1), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "DELETE", &format!("/api/users/{}", ADMIN), Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "You cannot delete your own account");

    let (status, body) = send(&app, "DELETE", "/api/users/404", Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "User not found");

    send(&app, "POST", "/api/books/borrow", Some(&student1), Some(json!({ "book_id": 1 }))).await;
    let (status, body) = send(&app, "DELETE", &format!("/api/users/{}", STUDENT1), Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Cannot delete user with active book borrowings. Ask them to return books first."
    );

    send(&app, "POST", "/api/books/return", Some(&student1), Some(json!({ "book_id": 1 }))).await;
    let (status, body) = send(&app, "DELETE", &format!("/api/users/{}", STUDENT1), Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User deleted successfully");
}

#[tokio::test]
async fn test_deleting_user_frees_their_slot() {
    let (app, _) = harness().await;
    let admin = token(ADMIN, Role::Admin);
    let student3 = token(STUDENT3, Role::Student);

    send(&app, "POST", "/api/slots/book", Some(&student3), Some(json!({ "slot_id": 9 }))).await;

    let (status, _) = send(&app, "DELETE", &format!("/api/users/{}", STUDENT3), Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, "GET", "/api/slots", Some(&admin), None).await;
    let slot = body.as_array().unwrap().iter().find(|s| s["id"] == 9).unwrap().clone();
    assert_eq!(slot["status"], "free");
    assert!(slot["booked_by_user_id"].is_null());

    // A still-valid token for the removed account books nothing.
    let (status, body) = send(&app, "POST", "/api/slots/book", Some(&student3), Some(json!({ "slot_id": 9 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "User not found");

    let (_, body) = send(&app, "GET", "/api/users/all", Some(&admin), None).await;
    assert_eq!(body.as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn test_open_event_stream_does_not_block_shutdown() {
    let (state, _) = seeded_state().await;
    let shutdown = state.shutdown.clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        axum::serve(listener, app(state))
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
                shutdown.trigger();
            })
            .await
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /api/events HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n")
        .await
        .unwrap();

    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = tokio::time::timeout(StdDuration::from_secs(5), client.read(&mut chunk))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed before headers");
        head.extend_from_slice(&chunk[..n]);
    }
    assert!(head.starts_with(b"HTTP/1.1 200"));

    stop_tx.send(()).unwrap();
    let served = tokio::time::timeout(StdDuration::from_secs(5), server)
        .await
        .expect("server still draining the event stream");
    served.unwrap().unwrap();
}
