//! Persistence for habits, completion history and points.
//!
//! The service talks to storage only through [`HabitStore`], so the same
//! code runs against a local SQLite file, an in-process map, or a hosted
//! table API.
//!
//! - [`sqlite`]: sqlx-backed SQLite store
//! - [`memory`]: in-process store for tests and throwaway runs
//! - [`remote`]: PostgREST-style hosted table API over HTTP

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{DateRange, Habit, HabitCompletion, HabitId, HabitStreakState};
use crate::points::UserPoints;

pub mod memory;
pub mod remote;
pub mod sqlite;

pub use memory::MemoryStore;
pub use remote::RemoteStore;
pub use sqlite::SqliteStore;

/// Storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The habit changed since it was read, or the completion row already
    /// exists. Re-read and retry, or report to the user.
    #[error("habit was modified concurrently")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote store returned {status}: {body}")]
    Remote { status: u16, body: String },

    /// A stored value could not be mapped back into the model.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Everything one accepted completion writes.
#[derive(Debug, Clone)]
pub struct CompletionCommit {
    pub habit_id: HabitId,
    pub user_id: String,
    /// Streak state the engine started from. The write is rejected with
    /// [`StoreError::Conflict`] if the stored state no longer matches.
    pub expected: HabitStreakState,
    pub new_state: HabitStreakState,
    pub completion: HabitCompletion,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait HabitStore: Send + Sync {
    async fn create_habit(&self, habit: &Habit) -> Result<(), StoreError>;

    /// Fetch a habit by id, active or not.
    async fn get_habit(&self, habit_id: HabitId) -> Result<Option<Habit>, StoreError>;

    /// A user's active habits, newest first.
    async fn list_active_habits(&self, user_id: &str) -> Result<Vec<Habit>, StoreError>;

    /// Soft-delete. Returns false when no active habit matched.
    async fn deactivate_habit(
        &self,
        user_id: &str,
        habit_id: HabitId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Persist a completion: the new streak state (guarded by
    /// `commit.expected`), the history record and the user's points award.
    /// Returns the user's updated points aggregate.
    async fn commit_completion(&self, commit: &CompletionCommit)
    -> Result<UserPoints, StoreError>;

    /// Completion history of a habit, newest first.
    async fn list_completions(
        &self,
        habit_id: HabitId,
        range: DateRange,
    ) -> Result<Vec<HabitCompletion>, StoreError>;

    async fn get_user_points(&self, user_id: &str) -> Result<Option<UserPoints>, StoreError>;
}

/// Apply a completion's points to an existing aggregate or start one.
pub(crate) fn apply_award(existing: Option<UserPoints>, commit: &CompletionCommit) -> UserPoints {
    let points = commit.completion.points_earned;
    let on = commit.completion.completion_date;
    match existing {
        Some(mut aggregate) => {
            aggregate.award(points, on);
            aggregate
        }
        None => UserPoints::first_award(commit.user_id.clone(), points, on),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    use super::CompletionCommit;
    use crate::engine::compute_completion;
    use crate::model::{
        Category, CompletionMethod, Difficulty, Habit, HabitCompletion, HabitStreakState,
        TargetFrequency,
    };

    pub fn habit(user_id: &str, title: &str) -> Habit {
        let now = Utc::now();
        Habit {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            description: Some("every morning".to_string()),
            category: Category::Fitness,
            target_frequency: TargetFrequency::Daily,
            difficulty: Difficulty::new(3).unwrap(),
            estimated_minutes: 30,
            target_days_per_week: 5,
            color: "#FF6B6B".to_string(),
            icon: "run".to_string(),
            reminder_time: Some("07:00".to_string()),
            reminder_enabled: true,
            streak: HabitStreakState::fresh(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Commit for completing `habit` on `date` from its current state.
    pub fn commit(habit: &Habit, date: NaiveDate) -> CompletionCommit {
        let result = compute_completion(&habit.streak, date, habit.difficulty).unwrap();
        CompletionCommit {
            habit_id: habit.id,
            user_id: habit.user_id.clone(),
            expected: habit.streak,
            new_state: result.new_state,
            completion: HabitCompletion {
                id: Uuid::new_v4(),
                habit_id: habit.id,
                user_id: habit.user_id.clone(),
                completion_date: date,
                completed_at: Utc::now(),
                mood_rating: Some(4),
                notes: None,
                points_earned: result.points_earned,
                completion_method: CompletionMethod::Manual,
                streak_length_at_completion: result.new_state.current_streak,
            },
            updated_at: Utc::now(),
        }
    }
}
