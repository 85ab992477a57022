//! Integration tests for the Streakline HTTP API.
//!
//! These tests drive the full request/response cycle through the router,
//! backed by an in-memory SQLite database and a clock the test controls.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum_test::TestServer;
use chrono::NaiveDate;
use serde_json::{Value, json};
use tower::ServiceExt;

use streakline::api::{AppState, router};
use streakline::clock::FixedClock;
use streakline::service::HabitService;
use streakline::store::SqliteStore;

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

async fn create_test_state() -> (AppState, Arc<FixedClock>) {
    let store = SqliteStore::new("sqlite::memory:").await.unwrap();
    let clock = Arc::new(FixedClock::on(start_date()));
    let state = AppState {
        service: HabitService::new(Arc::new(store), clock.clone()),
    };
    (state, clock)
}

async fn create_test_server() -> (TestServer, Arc<FixedClock>) {
    let (state, clock) = create_test_state().await;
    (TestServer::new(router(state)).unwrap(), clock)
}

async fn create_habit(server: &TestServer, user: &str, body: Value) -> String {
    let response = server
        .post(&format!("/users/{user}/habits"))
        .json(&body)
        .await;
    response.assert_status(StatusCode::CREATED);
    let habit: Value = response.json();
    habit["id"].as_str().unwrap().to_string()
}

async fn complete(server: &TestServer, user: &str, habit_id: &str) -> axum_test::TestResponse {
    server
        .post(&format!("/users/{user}/habits/{habit_id}/complete"))
        .json(&json!({}))
        .await
}

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _) = create_test_server().await;

    server.get("/health").await.assert_status_ok();
}

#[tokio::test]
async fn test_create_and_list_habits() {
    let (server, _) = create_test_server().await;

    create_habit(&server, "alice", json!({ "title": "Read books", "category": "education" })).await;
    create_habit(
        &server,
        "alice",
        json!({ "title": "Morning exercise", "difficulty": 4, "reminder_time": "07:00", "reminder_enabled": true }),
    )
    .await;

    let response = server.get("/users/alice/habits").await;
    response.assert_status_ok();

    let habits: Value = response.json();
    let habits = habits.as_array().unwrap();
    assert_eq!(habits.len(), 2);
    for habit in habits {
        assert_eq!(habit["current_streak"], 0);
        assert_eq!(habit["longest_streak"], 0);
        assert_eq!(habit["last_completed_date"], Value::Null);
        assert_eq!(habit["streak_tier"], "none");
        assert_eq!(habit["completed_today"], false);
    }

    let other: Value = server.get("/users/bob/habits").await.json();
    assert!(other.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_habit_rejects_bad_input() {
    let (server, _) = create_test_server().await;

    let response = server
        .post("/users/alice/habits")
        .json(&json!({ "title": "" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");

    let response = server
        .post("/users/alice/habits")
        .json(&json!({ "title": "Run", "difficulty": 7 }))
        .await;
    assert!(response.status_code().is_client_error());
}

#[tokio::test]
async fn test_complete_habit() {
    let (server, _) = create_test_server().await;
    let habit_id = create_habit(&server, "alice", json!({ "title": "Run", "difficulty": 3 })).await;

    let response = server
        .post(&format!("/users/alice/habits/{habit_id}/complete"))
        .json(&json!({ "notes": "easy 5k", "mood_rating": 4 }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let body: Value = response.json();
    assert_eq!(body["habit"]["current_streak"], 1);
    assert_eq!(body["habit"]["longest_streak"], 1);
    assert_eq!(body["habit"]["last_completed_date"], "2024-03-04");
    assert_eq!(body["habit"]["completed_today"], true);
    assert_eq!(body["completion"]["points_earned"], 30);
    assert_eq!(body["completion"]["streak_length_at_completion"], 1);
    assert_eq!(body["completion"]["mood_rating"], 4);
    assert_eq!(body["completion"]["notes"], "easy 5k");
    assert_eq!(body["completion"]["completion_method"], "manual");
    assert_eq!(body["points"]["total_points"], 30);
    assert_eq!(body["points"]["level"], 1);
}

#[tokio::test]
async fn test_duplicate_completion_returns_conflict() {
    let (server, _) = create_test_server().await;
    let habit_id = create_habit(&server, "alice", json!({ "title": "Run" })).await;

    complete(&server, "alice", &habit_id)
        .await
        .assert_status(StatusCode::CREATED);

    let response = complete(&server, "alice", &habit_id).await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"], "already_completed");
    assert_eq!(body["message"], "Habit already completed today");

    // State unchanged by the rejected attempt
    let habit: Value = server
        .get(&format!("/users/alice/habits/{habit_id}"))
        .await
        .json();
    assert_eq!(habit["current_streak"], 1);
    let points: Value = server.get("/users/alice/points").await.json();
    assert_eq!(points["total_points"], 10);
}

#[tokio::test]
async fn test_backdated_completion_is_unprocessable() {
    let (server, _) = create_test_server().await;
    let habit_id = create_habit(&server, "alice", json!({ "title": "Run" })).await;

    complete(&server, "alice", &habit_id)
        .await
        .assert_status(StatusCode::CREATED);

    let response = server
        .post(&format!("/users/alice/habits/{habit_id}/complete"))
        .json(&json!({ "date": "2024-03-01" }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["error"], "out_of_order");
}

#[tokio::test]
async fn test_week_long_streak_with_gap() {
    let (server, clock) = create_test_server().await;
    let habit_id = create_habit(&server, "alice", json!({ "title": "Run", "difficulty": 3 })).await;

    let mut last = Value::Null;
    for _ in 0..7 {
        let response = complete(&server, "alice", &habit_id).await;
        response.assert_status(StatusCode::CREATED);
        last = response.json();
        clock.advance_days(1);
    }

    assert_eq!(last["habit"]["current_streak"], 7);
    assert_eq!(last["habit"]["streak_tier"], "burning");
    assert_eq!(last["completion"]["points_earned"], 35);

    // Skip two days: streak restarts, longest is kept
    clock.advance_days(2);
    let body: Value = complete(&server, "alice", &habit_id).await.json();
    assert_eq!(body["habit"]["current_streak"], 1);
    assert_eq!(body["habit"]["longest_streak"], 7);
    assert_eq!(body["completion"]["points_earned"], 30);

    let history: Value = server
        .get(&format!("/users/alice/habits/{habit_id}/completions"))
        .await
        .json();
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 8);
    assert_eq!(history[0]["completion_date"], "2024-03-13");

    let week: Value = server
        .get(&format!(
            "/users/alice/habits/{habit_id}/completions?from=2024-03-05&to=2024-03-07"
        ))
        .await
        .json();
    assert_eq!(week.as_array().unwrap().len(), 3);

    let points: Value = server.get("/users/alice/points").await.json();
    assert_eq!(points["total_points"], 6 * 30 + 35 + 30);
}

#[tokio::test]
async fn test_delete_habit() {
    let (server, _) = create_test_server().await;
    let habit_id = create_habit(&server, "alice", json!({ "title": "Run" })).await;

    server
        .delete(&format!("/users/bob/habits/{habit_id}"))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    server
        .delete(&format!("/users/alice/habits/{habit_id}"))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    server
        .get(&format!("/users/alice/habits/{habit_id}"))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let response = complete(&server, "alice", &habit_id).await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"], "not_found");

    let habits: Value = server.get("/users/alice/habits").await.json();
    assert!(habits.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_habit_id() {
    let (server, _) = create_test_server().await;

    server
        .get("/users/alice/habits/5f0c6c1e-8f5e-4e5b-9b8e-3f7c2a9d1e00")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let response = server.get("/users/alice/habits/not-a-uuid").await;
    assert!(response.status_code().is_client_error());
}

#[tokio::test]
async fn test_summary() {
    let (server, clock) = create_test_server().await;
    let run = create_habit(&server, "alice", json!({ "title": "Run" })).await;
    create_habit(&server, "alice", json!({ "title": "Read" })).await;

    complete(&server, "alice", &run)
        .await
        .assert_status(StatusCode::CREATED);

    let summary: Value = server.get("/users/alice/summary").await.json();
    assert_eq!(summary["date"], "2024-03-04");
    assert_eq!(summary["total_habits"], 2);
    assert_eq!(summary["completed_today"], 1);
    assert_eq!(summary["progress"], 0.5);
    assert_eq!(summary["longest_streak"], 1);
    assert_eq!(summary["total_streak_days"], 1);

    clock.advance_days(1);
    let summary: Value = server.get("/users/alice/summary").await.json();
    assert_eq!(summary["completed_today"], 0);

    let summary: Value = server.get("/users/alice/summary?date=2024-03-04").await.json();
    assert_eq!(summary["completed_today"], 1);
}

#[tokio::test]
async fn test_points_for_new_user() {
    let (server, _) = create_test_server().await;

    let response = server.get("/users/newcomer/points").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["total_points"], 0);
    assert_eq!(body["level"], 1);
    assert_eq!(body["week_start"], "2024-03-04");
    assert_eq!(body["month_start"], "2024-03-01");
}

#[tokio::test]
async fn test_router_oneshot_health() {
    let (state, _) = create_test_state().await;

    let response = router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
