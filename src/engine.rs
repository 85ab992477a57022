//! Streak and points computation.
//!
//! Given a habit's prior [`HabitStreakState`] and the calendar day being
//! recorded, [`compute_completion`] decides the next streak, the longest
//! streak and the points earned. It is a pure function: no clock reads, no
//! I/O and no state between calls. Persisting the result, and serializing
//! concurrent completions of one habit, is the caller's job.

use chrono::NaiveDate;

use crate::model::{Difficulty, HabitStreakState};

/// Points per difficulty level on every completion.
pub const BASE_POINTS_PER_LEVEL: u32 = 10;

/// Every this many consecutive days earns another streak bonus step.
pub const STREAK_BONUS_INTERVAL: u32 = 7;

/// Bonus points per completed streak interval.
pub const STREAK_BONUS_POINTS: u32 = 5;

/// Reasons a completion is refused. Both leave the prior state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreakError {
    /// The habit was already completed on this calendar day.
    #[error("habit already completed on {date}")]
    DuplicateCompletion { date: NaiveDate },

    /// The date lies before the most recent completion.
    #[error("cannot record a completion for {attempted}: habit was last completed on {last_completed}")]
    OutOfOrder {
        last_completed: NaiveDate,
        attempted: NaiveDate,
    },
}

/// Outcome of an accepted completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionResult {
    pub new_state: HabitStreakState,
    pub points_earned: u32,
}

/// Compute the state after completing a habit on `completion_date`.
///
/// - same day as the last completion: [`StreakError::DuplicateCompletion`]
/// - earlier than the last completion: [`StreakError::OutOfOrder`]
/// - exactly one day later: the streak continues
/// - never completed, or a gap of two or more days: the streak restarts at 1
pub fn compute_completion(
    state: &HabitStreakState,
    completion_date: NaiveDate,
    difficulty: Difficulty,
) -> Result<CompletionResult, StreakError> {
    let new_streak = match state.last_completed_date {
        None => 1,
        Some(last) => {
            let gap_days = (completion_date - last).num_days();
            match gap_days {
                0 => return Err(StreakError::DuplicateCompletion { date: last }),
                1 => state.current_streak.saturating_add(1),
                gap if gap < 0 => {
                    return Err(StreakError::OutOfOrder {
                        last_completed: last,
                        attempted: completion_date,
                    });
                }
                _ => 1,
            }
        }
    };

    let new_state = HabitStreakState {
        current_streak: new_streak,
        longest_streak: new_streak.max(state.longest_streak),
        last_completed_date: Some(completion_date),
    };

    Ok(CompletionResult {
        new_state,
        points_earned: calculate_points(difficulty, new_streak),
    })
}

/// Points for one completion: `difficulty * 10` plus 5 for every full
/// week of streak.
pub fn calculate_points(difficulty: Difficulty, streak: u32) -> u32 {
    let base = u32::from(difficulty.get()) * BASE_POINTS_PER_LEVEL;
    let bonus = (streak / STREAK_BONUS_INTERVAL).saturating_mul(STREAK_BONUS_POINTS);
    base.saturating_add(bonus)
}
