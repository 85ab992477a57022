//! In-process store.
//!
//! Holds everything behind a single mutex, so `commit_completion` checks and
//! applies its three writes atomically. Data lives as long as the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CompletionCommit, HabitStore, StoreError, apply_award};
use crate::model::{DateRange, Habit, HabitCompletion, HabitId};
use crate::points::UserPoints;

#[derive(Default)]
struct Inner {
    habits: HashMap<HabitId, Habit>,
    completions: Vec<HabitCompletion>,
    points: HashMap<String, UserPoints>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl HabitStore for MemoryStore {
    async fn create_habit(&self, habit: &Habit) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.habits.contains_key(&habit.id) {
            return Err(StoreError::Conflict);
        }
        inner.habits.insert(habit.id, habit.clone());
        Ok(())
    }

    async fn get_habit(&self, habit_id: HabitId) -> Result<Option<Habit>, StoreError> {
        Ok(self.lock().habits.get(&habit_id).cloned())
    }

    async fn list_active_habits(&self, user_id: &str) -> Result<Vec<Habit>, StoreError> {
        let mut habits: Vec<Habit> = self
            .lock()
            .habits
            .values()
            .filter(|h| h.user_id == user_id && h.is_active)
            .cloned()
            .collect();
        habits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(habits)
    }

    async fn deactivate_habit(
        &self,
        user_id: &str,
        habit_id: HabitId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.habits.get_mut(&habit_id) {
            Some(habit) if habit.user_id == user_id && habit.is_active => {
                habit.is_active = false;
                habit.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit_completion(
        &self,
        commit: &CompletionCommit,
    ) -> Result<UserPoints, StoreError> {
        let mut inner = self.lock();

        let stale = match inner.habits.get(&commit.habit_id) {
            Some(habit) => !habit.is_active || habit.streak != commit.expected,
            None => true,
        };
        let duplicate = inner.completions.iter().any(|c| {
            c.habit_id == commit.habit_id
                && c.completion_date == commit.completion.completion_date
        });
        if stale || duplicate {
            return Err(StoreError::Conflict);
        }

        if let Some(habit) = inner.habits.get_mut(&commit.habit_id) {
            habit.streak = commit.new_state;
            habit.updated_at = commit.updated_at;
        }
        inner.completions.push(commit.completion.clone());

        let existing = inner.points.remove(&commit.user_id);
        let points = apply_award(existing, commit);
        inner.points.insert(commit.user_id.clone(), points.clone());

        Ok(points)
    }

    async fn list_completions(
        &self,
        habit_id: HabitId,
        range: DateRange,
    ) -> Result<Vec<HabitCompletion>, StoreError> {
        let mut completions: Vec<HabitCompletion> = self
            .lock()
            .completions
            .iter()
            .filter(|c| c.habit_id == habit_id && range.contains(c.completion_date))
            .cloned()
            .collect();
        completions.sort_by(|a, b| b.completion_date.cmp(&a.completion_date));
        Ok(completions)
    }

    async fn get_user_points(&self, user_id: &str) -> Result<Option<UserPoints>, StoreError> {
        Ok(self.lock().points.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_commit_updates_habit_history_and_points() {
        let store = MemoryStore::new();
        let habit = fixtures::habit("user-1", "Run");
        store.create_habit(&habit).await.unwrap();

        let commit = fixtures::commit(&habit, date("2024-04-01"));
        let points = store.commit_completion(&commit).await.unwrap();
        assert_eq!(points.total_points, 30);

        let stored = store.get_habit(habit.id).await.unwrap().unwrap();
        assert_eq!(stored.streak.current_streak, 1);
        assert_eq!(stored.streak.last_completed_date, Some(date("2024-04-01")));

        let history = store
            .list_completions(habit.id, DateRange::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_commit_conflicts() {
        let store = MemoryStore::new();
        let habit = fixtures::habit("user-1", "Run");
        store.create_habit(&habit).await.unwrap();

        let first = fixtures::commit(&habit, date("2024-04-01"));
        let racing = fixtures::commit(&habit, date("2024-04-02"));

        store.commit_completion(&first).await.unwrap();
        let err = store.commit_completion(&racing).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));

        let stored = store.get_habit(habit.id).await.unwrap().unwrap();
        assert_eq!(stored.streak.last_completed_date, Some(date("2024-04-01")));
        let points = store.get_user_points("user-1").await.unwrap().unwrap();
        assert_eq!(points.total_points, 30);
    }

    #[tokio::test]
    async fn test_duplicate_completion_row_conflicts() {
        let store = MemoryStore::new();
        let habit = fixtures::habit("user-1", "Run");
        store.create_habit(&habit).await.unwrap();

        // A history row for the day exists while the streak still matches
        let earlier = fixtures::commit(&habit, date("2024-04-01"));
        store.lock().completions.push(earlier.completion);

        let err = store
            .commit_completion(&fixtures::commit(&habit, date("2024-04-01")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));

        let stored = store.get_habit(habit.id).await.unwrap().unwrap();
        assert_eq!(stored.streak, habit.streak);
        assert!(store.get_user_points("user-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deactivate_hides_habit() {
        let store = MemoryStore::new();
        let habit = fixtures::habit("user-1", "Run");
        store.create_habit(&habit).await.unwrap();

        assert!(!store.deactivate_habit("someone-else", habit.id, Utc::now()).await.unwrap());
        assert!(store.deactivate_habit("user-1", habit.id, Utc::now()).await.unwrap());
        assert!(!store.deactivate_habit("user-1", habit.id, Utc::now()).await.unwrap());

        assert!(store.list_active_habits("user-1").await.unwrap().is_empty());
        assert!(!store.get_habit(habit.id).await.unwrap().unwrap().is_active);
    }
}
