//! HTTP API handlers for Streakline.
//!
//! All routes are scoped by user id in the path; authentication is left to
//! whatever sits in front of this service. Failures are returned as
//! `{"error": <code>, "message": <text>}` with these statuses:
//!
//! | error               | status |
//! |---------------------|--------|
//! | `already_completed` | 409    |
//! | `conflict`          | 409    |
//! | `out_of_order`      | 422    |
//! | `not_found`         | 404    |
//! | `invalid_request`   | 400    |
//! | `internal`          | 500    |
//!
//! Completion notes and mood ratings are never logged.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::engine::StreakError;
use crate::model::{
    CompleteHabit, CompletionResponse, DailySummary, DateRange, HabitCompletion, HabitId,
    HabitView, NewHabit, SummaryQuery,
};
use crate::points::UserPoints;
use crate::service::{HabitService, ServiceError};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: HabitService,
}

/// Build the router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/users/:user_id/habits", post(create_habit).get(list_habits))
        .route(
            "/users/:user_id/habits/:habit_id",
            get(get_habit).delete(delete_habit),
        )
        .route(
            "/users/:user_id/habits/:habit_id/complete",
            post(complete_habit),
        )
        .route(
            "/users/:user_id/habits/:habit_id/completions",
            get(list_completions),
        )
        .route("/users/:user_id/points", get(get_points))
        .route("/users/:user_id/summary", get(get_summary))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// A [`ServiceError`] on its way to becoming a response.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            ServiceError::Streak(StreakError::DuplicateCompletion { .. }) => {
                (StatusCode::CONFLICT, "already_completed")
            }
            ServiceError::Streak(StreakError::OutOfOrder { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "out_of_order")
            }
            ServiceError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ServiceError::Conflict => (StatusCode::CONFLICT, "conflict"),
            ServiceError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_code();

        let message = match &self.0 {
            ServiceError::Store(e) => {
                warn!(error = %e, "Storage failure");
                "internal storage error".to_string()
            }
            ServiceError::Streak(StreakError::DuplicateCompletion { .. }) => {
                "Habit already completed today".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorBody { error, message })).into_response()
    }
}

/// POST /users/:user_id/habits - Create a habit.
///
/// # Request Body
///
/// ```json
/// {
///     "title": "Morning run",
///     "category": "fitness",
///     "difficulty": 3,
///     "reminder_time": "07:00",
///     "reminder_enabled": true
/// }
/// ```
///
/// Only `title` is required. Returns `201 Created` with the habit.
#[instrument(skip(state, request))]
pub async fn create_habit(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<NewHabit>,
) -> Result<(StatusCode, Json<HabitView>), ApiError> {
    let habit = state.service.create_habit(&user_id, request).await?;
    let today = state.service.clock().today();

    Ok((StatusCode::CREATED, Json(HabitView::new(habit, today))))
}

/// GET /users/:user_id/habits - Active habits, newest first.
#[instrument(skip(state))]
pub async fn list_habits(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<HabitView>>, ApiError> {
    let habits = state.service.list_habits(&user_id).await?;
    let today = state.service.clock().today();
    info!(habit_count = habits.len(), "Habits listed");

    Ok(Json(
        habits
            .into_iter()
            .map(|habit| HabitView::new(habit, today))
            .collect(),
    ))
}

/// GET /users/:user_id/habits/:habit_id
#[instrument(skip(state))]
pub async fn get_habit(
    State(state): State<AppState>,
    Path((user_id, habit_id)): Path<(String, HabitId)>,
) -> Result<Json<HabitView>, ApiError> {
    let habit = state.service.get_habit(&user_id, habit_id).await?;
    let today = state.service.clock().today();

    Ok(Json(HabitView::new(habit, today)))
}

/// DELETE /users/:user_id/habits/:habit_id - Soft-delete a habit.
///
/// Returns `204 No Content`. History and points are kept.
#[instrument(skip(state))]
pub async fn delete_habit(
    State(state): State<AppState>,
    Path((user_id, habit_id)): Path<(String, HabitId)>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_habit(&user_id, habit_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /users/:user_id/habits/:habit_id/complete - Mark a habit done.
///
/// # Request Body
///
/// ```json
/// {
///     "notes": "felt great",
///     "mood_rating": 4,
///     "date": "2024-05-09"
/// }
/// ```
///
/// Every field is optional; `date` defaults to today.
///
/// # Response
///
/// `201 Created` with `{ "habit", "completion", "points" }`, or `409` with
/// `already_completed` when the habit was already done that day.
#[instrument(skip(state, request))]
pub async fn complete_habit(
    State(state): State<AppState>,
    Path((user_id, habit_id)): Path<(String, HabitId)>,
    Json(request): Json<CompleteHabit>,
) -> Result<(StatusCode, Json<CompletionResponse>), ApiError> {
    let outcome = state
        .service
        .complete_habit(&user_id, habit_id, request)
        .await?;
    let today = state.service.clock().today();

    Ok((
        StatusCode::CREATED,
        Json(CompletionResponse {
            habit: HabitView::new(outcome.habit, today),
            completion: outcome.completion,
            points: outcome.points,
        }),
    ))
}

/// GET /users/:user_id/habits/:habit_id/completions - Completion history.
///
/// # Query Parameters
///
/// - `from` (optional): earliest date, inclusive
/// - `to` (optional): latest date, inclusive
#[instrument(skip(state))]
pub async fn list_completions(
    State(state): State<AppState>,
    Path((user_id, habit_id)): Path<(String, HabitId)>,
    Query(range): Query<DateRange>,
) -> Result<Json<Vec<HabitCompletion>>, ApiError> {
    let completions = state
        .service
        .completion_history(&user_id, habit_id, range)
        .await?;

    Ok(Json(completions))
}

/// GET /users/:user_id/points - Running points totals and level.
#[instrument(skip(state))]
pub async fn get_points(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserPoints>, ApiError> {
    Ok(Json(state.service.user_points(&user_id).await?))
}

/// GET /users/:user_id/summary - Progress for one day.
///
/// # Query Parameters
///
/// - `date` (optional): day to summarize, defaults to today
#[instrument(skip(state))]
pub async fn get_summary(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<DailySummary>, ApiError> {
    Ok(Json(state.service.daily_summary(&user_id, query.date).await?))
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn mapped(err: ServiceError) -> (StatusCode, &'static str) {
        ApiError(err).status_and_code()
    }

    #[test]
    fn test_every_error_has_a_status() {
        assert_eq!(
            mapped(ServiceError::Streak(StreakError::DuplicateCompletion { date: day(9) })),
            (StatusCode::CONFLICT, "already_completed")
        );
        assert_eq!(
            mapped(ServiceError::Streak(StreakError::OutOfOrder {
                last_completed: day(9),
                attempted: day(2),
            })),
            (StatusCode::UNPROCESSABLE_ENTITY, "out_of_order")
        );
        assert_eq!(
            mapped(ServiceError::NotFound),
            (StatusCode::NOT_FOUND, "not_found")
        );
        assert_eq!(
            mapped(ServiceError::Validation("title must not be empty".into())),
            (StatusCode::BAD_REQUEST, "invalid_request")
        );
        assert_eq!(
            mapped(ServiceError::Conflict),
            (StatusCode::CONFLICT, "conflict")
        );
        assert_eq!(
            mapped(ServiceError::Store(StoreError::Corrupt("habit id".into()))),
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        );
    }

    #[test]
    fn test_store_conflict_becomes_retryable_conflict() {
        let err = ServiceError::from(StoreError::Conflict);
        assert_eq!(mapped(err), (StatusCode::CONFLICT, "conflict"));
    }

    #[tokio::test]
    async fn test_storage_failure_body_hides_details() {
        let response = ApiError(ServiceError::Store(StoreError::Remote {
            status: 503,
            body: "upstream password=hunter2".into(),
        }))
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "internal");
        assert_eq!(body["message"], "internal storage error");
    }
}
