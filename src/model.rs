//! Data models for Streakline.
//!
//! The streak engine only ever sees [`HabitStreakState`] and [`Difficulty`].
//! Everything else here is what the store persists and what the HTTP API
//! exchanges with clients.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::points::UserPoints;

/// Identifier of a habit.
pub type HabitId = Uuid;

/// Streak bookkeeping for a single habit.
///
/// Created as `0/0/absent` together with the habit and replaced wholesale by
/// the engine on every accepted completion. `current_streak <= longest_streak`
/// holds for every value the engine produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HabitStreakState {
    /// Consecutive completed days up to and including `last_completed_date`.
    pub current_streak: u32,

    /// Highest value `current_streak` has ever reached.
    pub longest_streak: u32,

    /// Calendar day of the most recent completion, if any.
    pub last_completed_date: Option<NaiveDate>,
}

impl HabitStreakState {
    /// State of a habit that has never been completed.
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Whether the most recent completion fell on `date`.
    pub fn completed_on(&self, date: NaiveDate) -> bool {
        self.last_completed_date == Some(date)
    }
}

/// Habit difficulty, 1 (trivial) to 5 (hard). Scales the base points award.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Difficulty(u8);

impl Difficulty {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(level: u8) -> Result<Self, InvalidDifficulty> {
        if (Self::MIN..=Self::MAX).contains(&level) {
            Ok(Self(level))
        } else {
            Err(InvalidDifficulty(i64::from(level)))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

impl TryFrom<i64> for Difficulty {
    type Error = InvalidDifficulty;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| InvalidDifficulty(value))
            .and_then(Self::new)
    }
}

impl From<Difficulty> for u8 {
    fn from(value: Difficulty) -> Self {
        value.0
    }
}

/// A difficulty level outside 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("difficulty level must be between 1 and 5, got {0}")]
pub struct InvalidDifficulty(pub i64);

/// What area of life a habit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Health,
    Education,
    Fitness,
    Mindfulness,
    Productivity,
    #[default]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Health => "health",
            Category::Education => "education",
            Category::Fitness => "fitness",
            Category::Mindfulness => "mindfulness",
            Category::Productivity => "productivity",
            Category::Other => "other",
        }
    }
}

impl FromStr for Category {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "health" => Ok(Category::Health),
            "education" => Ok(Category::Education),
            "fitness" => Ok(Category::Fitness),
            "mindfulness" => Ok(Category::Mindfulness),
            "productivity" => Ok(Category::Productivity),
            "other" => Ok(Category::Other),
            _ => Err(UnknownVariant {
                kind: "category",
                value: s.to_string(),
            }),
        }
    }
}

/// How often the user intends to do the habit.
///
/// Informational only: streaks are always counted in consecutive days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFrequency {
    #[default]
    Daily,
    Weekly,
}

impl TargetFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetFrequency::Daily => "daily",
            TargetFrequency::Weekly => "weekly",
        }
    }
}

impl FromStr for TargetFrequency {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(TargetFrequency::Daily),
            "weekly" => Ok(TargetFrequency::Weekly),
            _ => Err(UnknownVariant {
                kind: "target frequency",
                value: s.to_string(),
            }),
        }
    }
}

/// A stored enum column held a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// A habit as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: HabitId,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub target_frequency: TargetFrequency,
    pub difficulty: Difficulty,
    pub estimated_minutes: u32,
    pub target_days_per_week: u8,
    pub color: String,
    pub icon: String,
    /// Local reminder time as `HH:MM`.
    pub reminder_time: Option<String>,
    pub reminder_enabled: bool,

    #[serde(flatten)]
    pub streak: HabitStreakState,

    /// Cleared on delete; inactive habits are never listed or completed.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a completion was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMethod {
    #[default]
    Manual,
}

impl CompletionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionMethod::Manual => "manual",
        }
    }
}

impl FromStr for CompletionMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(CompletionMethod::Manual),
            _ => Err(UnknownVariant {
                kind: "completion method",
                value: s.to_string(),
            }),
        }
    }
}

/// Immutable history record written once per accepted completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitCompletion {
    pub id: Uuid,
    pub habit_id: HabitId,
    pub user_id: String,
    pub completion_date: NaiveDate,
    pub completed_at: DateTime<Utc>,
    pub mood_rating: Option<u8>,
    pub notes: Option<String>,
    pub points_earned: u32,
    pub completion_method: CompletionMethod,
    /// The habit's `current_streak` right after this completion.
    pub streak_length_at_completion: u32,
}

/// Streak badge band shown next to a habit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreakTier {
    /// No active streak.
    None,
    /// 1 to 6 days.
    Warming,
    /// 7 to 29 days.
    Burning,
    /// 30 to 99 days.
    Blazing,
    /// 100 days or more.
    Legendary,
}

impl StreakTier {
    pub fn for_streak(streak: u32) -> Self {
        match streak {
            0 => StreakTier::None,
            1..=6 => StreakTier::Warming,
            7..=29 => StreakTier::Burning,
            30..=99 => StreakTier::Blazing,
            _ => StreakTier::Legendary,
        }
    }
}

impl fmt::Display for StreakTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StreakTier::None => "none",
            StreakTier::Warming => "warming",
            StreakTier::Burning => "burning",
            StreakTier::Blazing => "blazing",
            StreakTier::Legendary => "legendary",
        };
        f.write_str(label)
    }
}

/// Request body for `POST /users/:user_id/habits`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewHabit {
    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub category: Category,

    #[serde(default)]
    pub target_frequency: TargetFrequency,

    #[serde(default)]
    pub difficulty: Difficulty,

    #[serde(default)]
    pub estimated_minutes: u32,

    #[serde(default = "default_target_days_per_week")]
    pub target_days_per_week: u8,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_icon")]
    pub icon: String,

    #[serde(default)]
    pub reminder_time: Option<String>,

    #[serde(default)]
    pub reminder_enabled: bool,
}

fn default_target_days_per_week() -> u8 {
    7
}

fn default_color() -> String {
    "#4ECDC4".to_string()
}

fn default_icon() -> String {
    "check".to_string()
}

/// Request body for `POST /users/:user_id/habits/:habit_id/complete`.
///
/// `date` backfills a missed day; it defaults to today and may not lie in
/// the future.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteHabit {
    #[serde(default)]
    pub notes: Option<String>,

    #[serde(default)]
    pub mood_rating: Option<u8>,

    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// Inclusive date filter for completion history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// Query parameters for `GET /users/:user_id/summary`.
#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub date: Option<NaiveDate>,
}

/// A habit decorated for display.
#[derive(Debug, Clone, Serialize)]
pub struct HabitView {
    #[serde(flatten)]
    pub habit: Habit,
    pub streak_tier: StreakTier,
    pub completed_today: bool,
}

impl HabitView {
    pub fn new(habit: Habit, today: NaiveDate) -> Self {
        Self {
            streak_tier: StreakTier::for_streak(habit.streak.current_streak),
            completed_today: habit.streak.completed_on(today),
            habit,
        }
    }
}

/// Response for a successful completion.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionResponse {
    pub habit: HabitView,
    pub completion: HabitCompletion,
    pub points: UserPoints,
}

/// Progress across a user's active habits for one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_habits: usize,
    pub completed_today: usize,
    /// `completed_today / total_habits`, 0.0 without habits.
    pub progress: f64,
    pub longest_streak: u32,
    pub total_streak_days: u64,
}

impl DailySummary {
    /// Summary counting habits whose latest completion falls on `date`.
    /// Only exact for the most recent day a habit was done; see
    /// [`DailySummary::with_completed`] for earlier dates.
    pub fn from_habits(habits: &[Habit], date: NaiveDate) -> Self {
        let completed_today = habits
            .iter()
            .filter(|h| h.streak.completed_on(date))
            .count();
        Self::with_completed(habits, date, completed_today)
    }

    /// Summary with a completion count taken from history. Streak figures
    /// are always the habits' current ones.
    pub fn with_completed(habits: &[Habit], date: NaiveDate, completed_today: usize) -> Self {
        let total_habits = habits.len();
        let progress = if total_habits > 0 {
            completed_today as f64 / total_habits as f64
        } else {
            0.0
        };

        Self {
            date,
            total_habits,
            completed_today,
            progress,
            longest_streak: habits
                .iter()
                .map(|h| h.streak.longest_streak)
                .max()
                .unwrap_or(0),
            total_streak_days: habits
                .iter()
                .map(|h| u64::from(h.streak.current_streak))
                .sum(),
        }
    }
}
