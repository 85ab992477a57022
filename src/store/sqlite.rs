//! SQLite storage layer.
//!
//! Three tables:
//!
//! - `habits`: one row per habit, streak columns included
//! - `habit_completions`: append-only history, unique on `(habit_id, completion_date)`
//! - `user_points`: running points aggregate per user
//!
//! Dates are stored as ISO `YYYY-MM-DD` text so they compare correctly as
//! strings.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, Transaction};
use uuid::Uuid;

use super::{CompletionCommit, HabitStore, StoreError, apply_award};
use crate::model::{
    DateRange, Difficulty, Habit, HabitCompletion, HabitId, HabitStreakState,
};
use crate::points::UserPoints;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database and create the schema if needed.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:streakline.db?mode=rwc" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // An in-memory database is shared between pooled connections; a
        // single connection keeps its transactions from tripping over
        // shared-cache table locks.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;

        Ok(store)
    }

    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS habits (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                category TEXT NOT NULL,
                target_frequency TEXT NOT NULL,
                difficulty_level INTEGER NOT NULL,
                estimated_minutes INTEGER NOT NULL,
                target_days_per_week INTEGER NOT NULL,
                color_theme TEXT NOT NULL,
                icon TEXT NOT NULL,
                reminder_time TEXT,
                reminder_enabled INTEGER NOT NULL,
                current_streak INTEGER NOT NULL DEFAULT 0,
                longest_streak INTEGER NOT NULL DEFAULT 0,
                last_completed_date TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_habits_user_active
            ON habits(user_id, is_active, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS habit_completions (
                id TEXT PRIMARY KEY,
                habit_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                completion_date TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                mood_rating INTEGER,
                notes TEXT,
                points_earned INTEGER NOT NULL,
                completion_method TEXT NOT NULL,
                streak_length_at_completion INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One completion per habit per day, whatever the caller does
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_completions_habit_date
            ON habit_completions(habit_id, completion_date)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_points (
                user_id TEXT PRIMARY KEY,
                total_points INTEGER NOT NULL,
                points_this_week INTEGER NOT NULL,
                points_this_month INTEGER NOT NULL,
                week_start TEXT NOT NULL,
                month_start TEXT NOT NULL,
                level INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_points(
        tx: &mut Transaction<'_, Sqlite>,
        user_id: &str,
    ) -> Result<Option<UserPoints>, StoreError> {
        let row: Option<PointsRow> = sqlx::query_as(
            r#"
            SELECT user_id, total_points, points_this_week, points_this_month,
                   week_start, month_start, level
            FROM user_points
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(UserPoints::try_from).transpose()
    }

    async fn save_points(
        tx: &mut Transaction<'_, Sqlite>,
        points: &UserPoints,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_points (
                user_id, total_points, points_this_week, points_this_month,
                week_start, month_start, level, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                total_points = excluded.total_points,
                points_this_week = excluded.points_this_week,
                points_this_month = excluded.points_this_month,
                week_start = excluded.week_start,
                month_start = excluded.month_start,
                level = excluded.level,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&points.user_id)
        .bind(points.total_points)
        .bind(points.points_this_week)
        .bind(points.points_this_month)
        .bind(points.week_start)
        .bind(points.month_start)
        .bind(i64::from(points.level))
        .bind(at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

const HABIT_COLUMNS: &str = r#"
    id, user_id, title, description, category, target_frequency,
    difficulty_level, estimated_minutes, target_days_per_week, color_theme,
    icon, reminder_time, reminder_enabled, current_streak, longest_streak,
    last_completed_date, is_active, created_at, updated_at
"#;

const COMPLETION_COLUMNS: &str = r#"
    id, habit_id, user_id, completion_date, completed_at, mood_rating, notes,
    points_earned, completion_method, streak_length_at_completion
"#;

#[async_trait]
impl HabitStore for SqliteStore {
    async fn create_habit(&self, habit: &Habit) -> Result<(), StoreError> {
        let row = HabitRow::from(habit);

        sqlx::query(&format!(
            "INSERT INTO habits ({HABIT_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(row.id)
        .bind(row.user_id)
        .bind(row.title)
        .bind(row.description)
        .bind(row.category)
        .bind(row.target_frequency)
        .bind(row.difficulty_level)
        .bind(row.estimated_minutes)
        .bind(row.target_days_per_week)
        .bind(row.color_theme)
        .bind(row.icon)
        .bind(row.reminder_time)
        .bind(row.reminder_enabled)
        .bind(row.current_streak)
        .bind(row.longest_streak)
        .bind(row.last_completed_date)
        .bind(row.is_active)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(conflict_on_unique)?;

        Ok(())
    }

    async fn get_habit(&self, habit_id: HabitId) -> Result<Option<Habit>, StoreError> {
        let row: Option<HabitRow> =
            sqlx::query_as(&format!("SELECT {HABIT_COLUMNS} FROM habits WHERE id = ?"))
                .bind(habit_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Habit::try_from).transpose()
    }

    async fn list_active_habits(&self, user_id: &str) -> Result<Vec<Habit>, StoreError> {
        let rows: Vec<HabitRow> = sqlx::query_as(&format!(
            "SELECT {HABIT_COLUMNS} FROM habits \
             WHERE user_id = ? AND is_active = 1 \
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Habit::try_from).collect()
    }

    async fn deactivate_habit(
        &self,
        user_id: &str,
        habit_id: HabitId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE habits SET is_active = 0, updated_at = ?
            WHERE id = ? AND user_id = ? AND is_active = 1
            "#,
        )
        .bind(at)
        .bind(habit_id.to_string())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit_completion(
        &self,
        commit: &CompletionCommit,
    ) -> Result<UserPoints, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Optimistic check: only advance the streak from the state the
        // engine computed against. `IS` matches NULL dates too.
        let updated = sqlx::query(
            r#"
            UPDATE habits
            SET current_streak = ?, longest_streak = ?, last_completed_date = ?, updated_at = ?
            WHERE id = ? AND is_active = 1
              AND current_streak = ? AND longest_streak = ? AND last_completed_date IS ?
            "#,
        )
        .bind(i64::from(commit.new_state.current_streak))
        .bind(i64::from(commit.new_state.longest_streak))
        .bind(commit.new_state.last_completed_date)
        .bind(commit.updated_at)
        .bind(commit.habit_id.to_string())
        .bind(i64::from(commit.expected.current_streak))
        .bind(i64::from(commit.expected.longest_streak))
        .bind(commit.expected.last_completed_date)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }

        let completion = CompletionRow::from(&commit.completion);
        sqlx::query(&format!(
            "INSERT INTO habit_completions ({COMPLETION_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(completion.id)
        .bind(completion.habit_id)
        .bind(completion.user_id)
        .bind(completion.completion_date)
        .bind(completion.completed_at)
        .bind(completion.mood_rating)
        .bind(completion.notes)
        .bind(completion.points_earned)
        .bind(completion.completion_method)
        .bind(completion.streak_length_at_completion)
        .execute(&mut *tx)
        .await
        .map_err(conflict_on_unique)?;

        let existing = Self::load_points(&mut tx, &commit.user_id).await?;
        let points = apply_award(existing, commit);
        Self::save_points(&mut tx, &points, commit.updated_at).await?;

        tx.commit().await?;

        Ok(points)
    }

    async fn list_completions(
        &self,
        habit_id: HabitId,
        range: DateRange,
    ) -> Result<Vec<HabitCompletion>, StoreError> {
        let rows: Vec<CompletionRow> = sqlx::query_as(&format!(
            "SELECT {COMPLETION_COLUMNS} FROM habit_completions \
             WHERE habit_id = ? \
               AND (? IS NULL OR completion_date >= ?) \
               AND (? IS NULL OR completion_date <= ?) \
             ORDER BY completion_date DESC"
        ))
        .bind(habit_id.to_string())
        .bind(range.from)
        .bind(range.from)
        .bind(range.to)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HabitCompletion::try_from).collect()
    }

    async fn get_user_points(&self, user_id: &str) -> Result<Option<UserPoints>, StoreError> {
        let row: Option<PointsRow> = sqlx::query_as(
            r#"
            SELECT user_id, total_points, points_this_week, points_this_month,
                   week_start, month_start, level
            FROM user_points
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserPoints::try_from).transpose()
    }
}

fn conflict_on_unique(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
        _ => StoreError::Database(err),
    }
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {err}"))
}

fn to_u32(what: &str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|e| corrupt(what, e))
}

/// Column image of a habit row. Shared with the remote store, whose tables
/// use the same column names.
#[derive(Debug, Clone, FromRow, serde::Serialize, serde::Deserialize)]
pub(crate) struct HabitRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub target_frequency: String,
    pub difficulty_level: i64,
    pub estimated_minutes: i64,
    pub target_days_per_week: i64,
    pub color_theme: String,
    pub icon: String,
    pub reminder_time: Option<String>,
    pub reminder_enabled: bool,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_completed_date: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Habit> for HabitRow {
    fn from(habit: &Habit) -> Self {
        Self {
            id: habit.id.to_string(),
            user_id: habit.user_id.clone(),
            title: habit.title.clone(),
            description: habit.description.clone(),
            category: habit.category.as_str().to_string(),
            target_frequency: habit.target_frequency.as_str().to_string(),
            difficulty_level: i64::from(habit.difficulty.get()),
            estimated_minutes: i64::from(habit.estimated_minutes),
            target_days_per_week: i64::from(habit.target_days_per_week),
            color_theme: habit.color.clone(),
            icon: habit.icon.clone(),
            reminder_time: habit.reminder_time.clone(),
            reminder_enabled: habit.reminder_enabled,
            current_streak: i64::from(habit.streak.current_streak),
            longest_streak: i64::from(habit.streak.longest_streak),
            last_completed_date: habit.streak.last_completed_date,
            is_active: habit.is_active,
            created_at: habit.created_at,
            updated_at: habit.updated_at,
        }
    }
}

impl TryFrom<HabitRow> for Habit {
    type Error = StoreError;

    fn try_from(row: HabitRow) -> Result<Self, Self::Error> {
        Ok(Habit {
            id: Uuid::parse_str(&row.id).map_err(|e| corrupt("habit id", e))?,
            user_id: row.user_id,
            title: row.title,
            description: row.description,
            category: row.category.parse().map_err(|e| corrupt("habit", e))?,
            target_frequency: row
                .target_frequency
                .parse()
                .map_err(|e| corrupt("habit", e))?,
            difficulty: Difficulty::try_from(row.difficulty_level)
                .map_err(|e| corrupt("habit", e))?,
            estimated_minutes: to_u32("estimated_minutes", row.estimated_minutes)?,
            target_days_per_week: u8::try_from(row.target_days_per_week)
                .map_err(|e| corrupt("target_days_per_week", e))?,
            color: row.color_theme,
            icon: row.icon,
            reminder_time: row.reminder_time,
            reminder_enabled: row.reminder_enabled,
            streak: HabitStreakState {
                current_streak: to_u32("current_streak", row.current_streak)?,
                longest_streak: to_u32("longest_streak", row.longest_streak)?,
                last_completed_date: row.last_completed_date,
            },
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow, serde::Serialize, serde::Deserialize)]
pub(crate) struct CompletionRow {
    pub id: String,
    pub habit_id: String,
    pub user_id: String,
    pub completion_date: NaiveDate,
    pub completed_at: DateTime<Utc>,
    pub mood_rating: Option<i64>,
    pub notes: Option<String>,
    pub points_earned: i64,
    pub completion_method: String,
    pub streak_length_at_completion: i64,
}

impl From<&HabitCompletion> for CompletionRow {
    fn from(completion: &HabitCompletion) -> Self {
        Self {
            id: completion.id.to_string(),
            habit_id: completion.habit_id.to_string(),
            user_id: completion.user_id.clone(),
            completion_date: completion.completion_date,
            completed_at: completion.completed_at,
            mood_rating: completion.mood_rating.map(i64::from),
            notes: completion.notes.clone(),
            points_earned: i64::from(completion.points_earned),
            completion_method: completion.completion_method.as_str().to_string(),
            streak_length_at_completion: i64::from(completion.streak_length_at_completion),
        }
    }
}

impl TryFrom<CompletionRow> for HabitCompletion {
    type Error = StoreError;

    fn try_from(row: CompletionRow) -> Result<Self, Self::Error> {
        Ok(HabitCompletion {
            id: Uuid::parse_str(&row.id).map_err(|e| corrupt("completion id", e))?,
            habit_id: Uuid::parse_str(&row.habit_id).map_err(|e| corrupt("habit id", e))?,
            user_id: row.user_id,
            completion_date: row.completion_date,
            completed_at: row.completed_at,
            mood_rating: row
                .mood_rating
                .map(u8::try_from)
                .transpose()
                .map_err(|e| corrupt("mood_rating", e))?,
            notes: row.notes,
            points_earned: to_u32("points_earned", row.points_earned)?,
            completion_method: row
                .completion_method
                .parse()
                .map_err(|e| corrupt("completion", e))?,
            streak_length_at_completion: to_u32(
                "streak_length_at_completion",
                row.streak_length_at_completion,
            )?,
        })
    }
}

#[derive(Debug, Clone, FromRow, serde::Serialize, serde::Deserialize)]
pub(crate) struct PointsRow {
    pub user_id: String,
    pub total_points: i64,
    pub points_this_week: i64,
    pub points_this_month: i64,
    pub week_start: NaiveDate,
    pub month_start: NaiveDate,
    pub level: i64,
}

impl From<&UserPoints> for PointsRow {
    fn from(points: &UserPoints) -> Self {
        Self {
            user_id: points.user_id.clone(),
            total_points: points.total_points,
            points_this_week: points.points_this_week,
            points_this_month: points.points_this_month,
            week_start: points.week_start,
            month_start: points.month_start,
            level: i64::from(points.level),
        }
    }
}

impl TryFrom<PointsRow> for UserPoints {
    type Error = StoreError;

    fn try_from(row: PointsRow) -> Result<Self, Self::Error> {
        Ok(UserPoints {
            user_id: row.user_id,
            total_points: row.total_points,
            points_this_week: row.points_this_week,
            points_this_month: row.points_this_month,
            week_start: row.week_start,
            month_start: row.month_start,
            level: to_u32("level", row.level)?,
        })
    }
}
