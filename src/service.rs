//! Habit operations on top of a [`HabitStore`].
//!
//! Completing a habit is a read-modify-write: load the streak state, run the
//! engine, persist the result. [`HabitService`] holds a lock per habit across
//! those three steps so concurrent requests in this process cannot both
//! build on the same prior state. The store's optimistic check covers
//! writers in other processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveTime;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::engine::{StreakError, compute_completion};
use crate::model::{
    CompleteHabit, CompletionMethod, DailySummary, DateRange, Habit, HabitCompletion, HabitId,
    HabitStreakState, NewHabit,
};
use crate::points::UserPoints;
use crate::store::{CompletionCommit, HabitStore, StoreError};

pub const MAX_TITLE_CHARS: usize = 120;
pub const MAX_NOTES_CHARS: usize = 500;

/// Errors surfaced by [`HabitService`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Streak(#[from] StreakError),

    #[error("habit not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    /// Lost a race with another writer; the request can be retried.
    #[error("habit was modified concurrently, try again")]
    Conflict,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => ServiceError::Conflict,
            other => ServiceError::Store(other),
        }
    }
}

/// Result of a successful completion.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub habit: Habit,
    pub completion: HabitCompletion,
    pub points: UserPoints,
}

/// One async mutex per habit id, created on demand.
#[derive(Default)]
struct HabitLocks {
    locks: Mutex<HashMap<HabitId, Arc<tokio::sync::Mutex<()>>>>,
}

impl HabitLocks {
    async fn acquire(&self, habit_id: HabitId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(habit_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct HabitService {
    store: Arc<dyn HabitStore>,
    clock: Arc<dyn Clock>,
    locks: Arc<HabitLocks>,
}

impl HabitService {
    pub fn new(store: Arc<dyn HabitStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            locks: Arc::default(),
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub async fn create_habit(&self, user_id: &str, new: NewHabit) -> Result<Habit, ServiceError> {
        validate_user_id(user_id)?;
        let title = validate_new_habit(&new)?;

        let now = self.clock.now();
        let habit = Habit {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            title,
            description: new
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            category: new.category,
            target_frequency: new.target_frequency,
            difficulty: new.difficulty,
            estimated_minutes: new.estimated_minutes,
            target_days_per_week: new.target_days_per_week,
            color: new.color,
            icon: new.icon,
            reminder_time: new.reminder_time,
            reminder_enabled: new.reminder_enabled,
            streak: HabitStreakState::fresh(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        self.store.create_habit(&habit).await?;
        info!(habit_id = %habit.id, difficulty = habit.difficulty.get(), "Habit created");

        Ok(habit)
    }

    pub async fn list_habits(&self, user_id: &str) -> Result<Vec<Habit>, ServiceError> {
        Ok(self.store.list_active_habits(user_id).await?)
    }

    /// An active habit owned by `user_id`.
    pub async fn get_habit(&self, user_id: &str, habit_id: HabitId) -> Result<Habit, ServiceError> {
        match self.store.get_habit(habit_id).await? {
            Some(habit) if habit.is_active && habit.user_id == user_id => Ok(habit),
            _ => Err(ServiceError::NotFound),
        }
    }

    pub async fn delete_habit(&self, user_id: &str, habit_id: HabitId) -> Result<(), ServiceError> {
        let _guard = self.locks.acquire(habit_id).await;

        if self
            .store
            .deactivate_habit(user_id, habit_id, self.clock.now())
            .await?
        {
            info!(habit_id = %habit_id, "Habit deactivated");
            Ok(())
        } else {
            Err(ServiceError::NotFound)
        }
    }

    /// Record a completion for today, or for `request.date` when backfilling.
    ///
    /// Engine refusals come back as [`ServiceError::Streak`] and nothing is
    /// written.
    pub async fn complete_habit(
        &self,
        user_id: &str,
        habit_id: HabitId,
        request: CompleteHabit,
    ) -> Result<CompletionOutcome, ServiceError> {
        validate_completion(&request)?;

        let now = self.clock.now();
        let today = now.date_naive();
        let completion_date = request.date.unwrap_or(today);
        if completion_date > today {
            return Err(ServiceError::Validation(format!(
                "cannot complete a habit for a future date ({completion_date})"
            )));
        }

        let _guard = self.locks.acquire(habit_id).await;

        let habit = self.get_habit(user_id, habit_id).await?;
        let result = compute_completion(&habit.streak, completion_date, habit.difficulty)?;

        let completion = HabitCompletion {
            id: Uuid::new_v4(),
            habit_id,
            user_id: user_id.to_string(),
            completion_date,
            completed_at: now,
            mood_rating: request.mood_rating,
            notes: request
                .notes
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            points_earned: result.points_earned,
            completion_method: CompletionMethod::Manual,
            streak_length_at_completion: result.new_state.current_streak,
        };

        let commit = CompletionCommit {
            habit_id,
            user_id: user_id.to_string(),
            expected: habit.streak,
            new_state: result.new_state,
            completion,
            updated_at: now,
        };
        let points = self.store.commit_completion(&commit).await?;

        info!(
            habit_id = %habit_id,
            date = %completion_date,
            streak = result.new_state.current_streak,
            points = result.points_earned,
            "Habit completed"
        );

        Ok(CompletionOutcome {
            habit: Habit {
                streak: result.new_state,
                updated_at: now,
                ..habit
            },
            completion: commit.completion,
            points,
        })
    }

    pub async fn completion_history(
        &self,
        user_id: &str,
        habit_id: HabitId,
        range: DateRange,
    ) -> Result<Vec<HabitCompletion>, ServiceError> {
        if let (Some(from), Some(to)) = (range.from, range.to)
            && from > to
        {
            return Err(ServiceError::Validation(format!(
                "'from' ({from}) is after 'to' ({to})"
            )));
        }

        self.get_habit(user_id, habit_id).await?;
        Ok(self.store.list_completions(habit_id, range).await?)
    }

    /// The user's points, zeroed if they have never completed anything.
    pub async fn user_points(&self, user_id: &str) -> Result<UserPoints, ServiceError> {
        let points = self.store.get_user_points(user_id).await?;
        Ok(points.unwrap_or_else(|| UserPoints::empty(user_id, self.clock.today())))
    }

    pub async fn daily_summary(
        &self,
        user_id: &str,
        date: Option<chrono::NaiveDate>,
    ) -> Result<DailySummary, ServiceError> {
        let date = date.unwrap_or_else(|| self.clock.today());
        let habits = self.store.list_active_habits(user_id).await?;
        debug!(habit_count = habits.len(), date = %date, "Summarizing day");

        // A habit done again after `date` no longer shows it in its streak
        // state, so look it up in the history instead.
        let mut completed = 0;
        for habit in &habits {
            let done = match habit.streak.last_completed_date {
                Some(last) if last == date => true,
                Some(last) if last > date => {
                    let day = DateRange {
                        from: Some(date),
                        to: Some(date),
                    };
                    !self.store.list_completions(habit.id, day).await?.is_empty()
                }
                _ => false,
            };
            if done {
                completed += 1;
            }
        }

        Ok(DailySummary::with_completed(&habits, date, completed))
    }
}

fn validate_user_id(user_id: &str) -> Result<(), ServiceError> {
    if user_id.trim().is_empty() {
        return Err(ServiceError::Validation("user id must not be empty".into()));
    }
    Ok(())
}

/// Check a new habit and return its trimmed title.
fn validate_new_habit(new: &NewHabit) -> Result<String, ServiceError> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(ServiceError::Validation("title must not be empty".into()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ServiceError::Validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    if !(1..=7).contains(&new.target_days_per_week) {
        return Err(ServiceError::Validation(
            "target_days_per_week must be between 1 and 7".into(),
        ));
    }
    if let Some(time) = &new.reminder_time
        && NaiveTime::parse_from_str(time, "%H:%M").is_err()
    {
        return Err(ServiceError::Validation(format!(
            "reminder_time must be HH:MM, got '{time}'"
        )));
    }
    if new.reminder_enabled && new.reminder_time.is_none() {
        return Err(ServiceError::Validation(
            "reminder_enabled requires reminder_time".into(),
        ));
    }
    Ok(title.to_string())
}

fn validate_completion(request: &CompleteHabit) -> Result<(), ServiceError> {
    if let Some(mood) = request.mood_rating
        && !(1..=5).contains(&mood)
    {
        return Err(ServiceError::Validation(
            "mood_rating must be between 1 and 5".into(),
        ));
    }
    if let Some(notes) = &request.notes
        && notes.chars().count() > MAX_NOTES_CHARS
    {
        return Err(ServiceError::Validation(format!(
            "notes must be at most {MAX_NOTES_CHARS} characters"
        )));
    }
    Ok(())
}
