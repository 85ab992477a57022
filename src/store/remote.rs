//! Hosted table API client.
//!
//! Talks to a PostgREST-style REST endpoint (the interface hosted
//! backend-as-a-service databases expose) with the same tables and column
//! names as the SQLite store.
//!
//! # Consistency
//!
//! The streak update is guarded by filtering the `PATCH` on the expected
//! streak columns; an empty representation means somebody else got there
//! first. The unique `(habit_id, completion_date)` constraint on the remote
//! table turns a duplicate insert into HTTP 409.
//!
//! The points row is shared by all of a user's habits, which the per-habit
//! lock does not cover. It is written with a `PATCH` filtered on the total
//! that was read (totals only grow), or a plain insert that 409s if another
//! writer created the row first, and re-read on a miss.
//!
//! The three writes are separate requests. When a later one fails, the
//! completion row is deleted and the streak is patched back to
//! `expected` before the error is returned.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use super::sqlite::{CompletionRow, HabitRow, PointsRow};
use super::{CompletionCommit, HabitStore, StoreError, apply_award};
use crate::model::{DateRange, Habit, HabitCompletion, HabitId, HabitStreakState};
use crate::points::UserPoints;

const HABITS: &str = "habits";
const COMPLETIONS: &str = "habit_completions";
const USER_POINTS: &str = "user_points";

/// Attempts at the points write before giving up with a conflict.
const POINTS_ATTEMPTS: usize = 5;

/// Client for a hosted table API.
#[derive(Clone)]
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RemoteStore {
    /// # Arguments
    ///
    /// * `base_url` - REST root, e.g. `https://project.example.co/rest/v1`
    /// * `api_key` - sent as both `apikey` and bearer token
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, table: &str, filters: &[(&str, String)]) -> String {
        let query: Vec<String> = filters
            .iter()
            .map(|(column, filter)| format!("{column}={filter}"))
            .collect();
        if query.is_empty() {
            format!("{}/{}", self.base_url, table)
        } else {
            format!("{}/{}?{}", self.base_url, table, query.join("&"))
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn fetch_rows<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, StoreError> {
        debug!(url = %url, "Fetching rows");
        let response = check(self.request(Method::GET, url).send().await?).await?;
        Ok(response.json::<Vec<T>>().await?)
    }

    /// Move a habit's streak from `from` to `to`. Returns false when the
    /// stored state no longer matches `from`.
    async fn patch_streak(
        &self,
        habit_id: HabitId,
        from: &HabitStreakState,
        to: &HabitStreakState,
        at: DateTime<Utc>,
        only_active: bool,
    ) -> Result<bool, StoreError> {
        let mut filters = vec![("id", eq(habit_id))];
        if only_active {
            filters.push(("is_active", "eq.true".to_string()));
        }
        filters.extend(streak_filters(from));

        let body = json!({
            "current_streak": to.current_streak,
            "longest_streak": to.longest_streak,
            "last_completed_date": to.last_completed_date,
            "updated_at": at,
        });

        let response = self
            .request(Method::PATCH, &self.url(HABITS, &filters))
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;
        let rows: Vec<HabitRow> = check(response).await?.json().await?;

        Ok(!rows.is_empty())
    }

    async fn insert_completion(&self, completion: &HabitCompletion) -> Result<(), StoreError> {
        let response = self
            .request(Method::POST, &self.url(COMPLETIONS, &[]))
            .header("Prefer", "return=minimal")
            .json(&CompletionRow::from(completion))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(StoreError::Conflict);
        }
        check(response).await?;
        Ok(())
    }

    async fn delete_completion(&self, completion: &HabitCompletion) -> Result<(), StoreError> {
        let url = self.url(COMPLETIONS, &[("id", eq(completion.id))]);
        check(self.request(Method::DELETE, &url).send().await?).await?;
        Ok(())
    }

    /// Add the commit's award to the user's points row, re-reading and
    /// retrying when another writer moved the row first.
    async fn award_points(&self, commit: &CompletionCommit) -> Result<UserPoints, StoreError> {
        for attempt in 1..=POINTS_ATTEMPTS {
            let existing = self.get_user_points(&commit.user_id).await?;
            let read_total = existing.as_ref().map(|p| p.total_points);
            let points = apply_award(existing, commit);

            let written = match read_total {
                Some(total) => self.update_points(&points, total).await?,
                None => self.insert_points(&points).await?,
            };
            if written {
                return Ok(points);
            }
            debug!(user_id = %commit.user_id, attempt, "Points row moved, retrying");
        }

        Err(StoreError::Conflict)
    }

    async fn update_points(&self, points: &UserPoints, read_total: i64) -> Result<bool, StoreError> {
        let url = self.url(
            USER_POINTS,
            &[
                ("user_id", eq(&points.user_id)),
                ("total_points", eq(read_total)),
            ],
        );
        let response = self
            .request(Method::PATCH, &url)
            .header("Prefer", "return=representation")
            .json(&PointsRow::from(points))
            .send()
            .await?;
        let rows: Vec<PointsRow> = check(response).await?.json().await?;

        Ok(!rows.is_empty())
    }

    /// First award for a user. False when the row already exists.
    async fn insert_points(&self, points: &UserPoints) -> Result<bool, StoreError> {
        let response = self
            .request(Method::POST, &self.url(USER_POINTS, &[]))
            .header("Prefer", "return=minimal")
            .json(&PointsRow::from(points))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }

    /// Undo the streak update and, if it was written, the completion row.
    /// Failures are logged; the caller reports the original error.
    async fn roll_back(&self, commit: &CompletionCommit, completion_written: bool) {
        if completion_written && let Err(e) = self.delete_completion(&commit.completion).await {
            warn!(habit_id = %commit.habit_id, error = %e, "Could not remove completion row");
        }

        match self
            .patch_streak(
                commit.habit_id,
                &commit.new_state,
                &commit.expected,
                commit.updated_at,
                false,
            )
            .await
        {
            Ok(true) => debug!(habit_id = %commit.habit_id, "Streak update rolled back"),
            Ok(false) => {
                warn!(habit_id = %commit.habit_id, "Streak moved on before rollback")
            }
            Err(e) => {
                warn!(habit_id = %commit.habit_id, error = %e, "Could not roll back streak")
            }
        }
    }
}

#[async_trait]
impl HabitStore for RemoteStore {
    async fn create_habit(&self, habit: &Habit) -> Result<(), StoreError> {
        let response = self
            .request(Method::POST, &self.url(HABITS, &[]))
            .header("Prefer", "return=minimal")
            .json(&HabitRow::from(habit))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(StoreError::Conflict);
        }
        check(response).await?;
        Ok(())
    }

    async fn get_habit(&self, habit_id: HabitId) -> Result<Option<Habit>, StoreError> {
        let url = self.url(HABITS, &[("select", "*".to_string()), ("id", eq(habit_id))]);
        let rows: Vec<HabitRow> = self.fetch_rows(&url).await?;

        rows.into_iter().next().map(Habit::try_from).transpose()
    }

    async fn list_active_habits(&self, user_id: &str) -> Result<Vec<Habit>, StoreError> {
        let url = self.url(
            HABITS,
            &[
                ("select", "*".to_string()),
                ("user_id", eq(user_id)),
                ("is_active", "eq.true".to_string()),
                ("order", "created_at.desc".to_string()),
            ],
        );
        let rows: Vec<HabitRow> = self.fetch_rows(&url).await?;

        rows.into_iter().map(Habit::try_from).collect()
    }

    async fn deactivate_habit(
        &self,
        user_id: &str,
        habit_id: HabitId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let url = self.url(
            HABITS,
            &[
                ("id", eq(habit_id)),
                ("user_id", eq(user_id)),
                ("is_active", "eq.true".to_string()),
            ],
        );
        let response = self
            .request(Method::PATCH, &url)
            .header("Prefer", "return=representation")
            .json(&json!({ "is_active": false, "updated_at": at }))
            .send()
            .await?;
        let rows: Vec<HabitRow> = check(response).await?.json().await?;

        Ok(!rows.is_empty())
    }

    async fn commit_completion(
        &self,
        commit: &CompletionCommit,
    ) -> Result<UserPoints, StoreError> {
        let advanced = self
            .patch_streak(
                commit.habit_id,
                &commit.expected,
                &commit.new_state,
                commit.updated_at,
                true,
            )
            .await?;
        if !advanced {
            return Err(StoreError::Conflict);
        }

        if let Err(e) = self.insert_completion(&commit.completion).await {
            self.roll_back(commit, false).await;
            return Err(e);
        }

        match self.award_points(commit).await {
            Ok(points) => Ok(points),
            Err(e) => {
                self.roll_back(commit, true).await;
                Err(e)
            }
        }
    }

    async fn list_completions(
        &self,
        habit_id: HabitId,
        range: DateRange,
    ) -> Result<Vec<HabitCompletion>, StoreError> {
        let mut filters = vec![("select", "*".to_string()), ("habit_id", eq(habit_id))];
        if let Some(from) = range.from {
            filters.push(("completion_date", format!("gte.{from}")));
        }
        if let Some(to) = range.to {
            filters.push(("completion_date", format!("lte.{to}")));
        }
        filters.push(("order", "completion_date.desc".to_string()));

        let rows: Vec<CompletionRow> = self.fetch_rows(&self.url(COMPLETIONS, &filters)).await?;

        rows.into_iter().map(HabitCompletion::try_from).collect()
    }

    async fn get_user_points(&self, user_id: &str) -> Result<Option<UserPoints>, StoreError> {
        let url = self.url(
            USER_POINTS,
            &[("select", "*".to_string()), ("user_id", eq(user_id))],
        );
        let rows: Vec<PointsRow> = self.fetch_rows(&url).await?;

        rows.into_iter().next().map(UserPoints::try_from).transpose()
    }
}

/// `eq.` filter with the value percent-encoded.
fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", urlencoding::encode(&value.to_string()))
}

fn streak_filters(state: &HabitStreakState) -> Vec<(&'static str, String)> {
    vec![
        ("current_streak", eq(state.current_streak)),
        ("longest_streak", eq(state.longest_streak)),
        (
            "last_completed_date",
            match state.last_completed_date {
                Some(date) => eq(date),
                None => "is.null".to_string(),
            },
        ),
    ]
}

async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Remote {
        status: status.as_u16(),
        body,
    })
}
