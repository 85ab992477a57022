//! Per-user running points totals.
//!
//! Every accepted completion awards the engine's `points_earned` to the
//! owning user. Totals only grow; the weekly and monthly counters restart
//! when an award lands in a later ISO week or calendar month than the one
//! they currently track.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Points needed per level.
pub const POINTS_PER_LEVEL: i64 = 1000;

/// Running points aggregate for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPoints {
    pub user_id: String,
    pub total_points: i64,
    pub points_this_week: i64,
    pub points_this_month: i64,
    /// Monday of the week `points_this_week` belongs to.
    pub week_start: NaiveDate,
    /// First day of the month `points_this_month` belongs to.
    pub month_start: NaiveDate,
    pub level: u32,
}

impl UserPoints {
    /// Aggregate for a user that has not earned anything yet.
    pub fn empty(user_id: impl Into<String>, today: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            total_points: 0,
            points_this_week: 0,
            points_this_month: 0,
            week_start: week_start(today),
            month_start: month_start(today),
            level: level_for(0),
        }
    }

    /// Aggregate created by a user's first award.
    pub fn first_award(user_id: impl Into<String>, points: u32, on: NaiveDate) -> Self {
        let mut aggregate = Self::empty(user_id, on);
        aggregate.award(points, on);
        aggregate
    }

    /// Add `points` earned by a completion dated `on`.
    ///
    /// Backfilled completions from an earlier week or month count toward
    /// the total only.
    pub fn award(&mut self, points: u32, on: NaiveDate) {
        let points = i64::from(points);
        self.total_points = self.total_points.saturating_add(points);

        let week = week_start(on);
        if week > self.week_start {
            self.week_start = week;
            self.points_this_week = points;
        } else if week == self.week_start {
            self.points_this_week = self.points_this_week.saturating_add(points);
        }

        let month = month_start(on);
        if month > self.month_start {
            self.month_start = month;
            self.points_this_month = points;
        } else if month == self.month_start {
            self.points_this_month = self.points_this_month.saturating_add(points);
        }

        self.level = level_for(self.total_points);
    }
}

/// Level reached with `total_points`: one level per 1000 points, from 1.
pub fn level_for(total_points: i64) -> u32 {
    let level = total_points.max(0) / POINTS_PER_LEVEL + 1;
    u32::try_from(level).unwrap_or(u32::MAX)
}

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_award() {
        // 2024-05-15 is a Wednesday
        let points = UserPoints::first_award("user-1", 35, date("2024-05-15"));

        assert_eq!(points.total_points, 35);
        assert_eq!(points.points_this_week, 35);
        assert_eq!(points.points_this_month, 35);
        assert_eq!(points.week_start, date("2024-05-13"));
        assert_eq!(points.month_start, date("2024-05-01"));
        assert_eq!(points.level, 1);
    }

    #[test]
    fn test_awards_accumulate_within_week() {
        let mut points = UserPoints::first_award("user-1", 10, date("2024-05-13"));
        points.award(20, date("2024-05-19"));

        assert_eq!(points.total_points, 30);
        assert_eq!(points.points_this_week, 30);
        assert_eq!(points.points_this_month, 30);
    }

    #[test]
    fn test_week_rolls_over() {
        let mut points = UserPoints::first_award("user-1", 10, date("2024-05-19"));
        points.award(20, date("2024-05-20"));

        assert_eq!(points.total_points, 30);
        assert_eq!(points.points_this_week, 20);
        assert_eq!(points.week_start, date("2024-05-20"));
        assert_eq!(points.points_this_month, 30);
    }

    #[test]
    fn test_month_rolls_over() {
        let mut points = UserPoints::first_award("user-1", 40, date("2024-05-31"));
        points.award(15, date("2024-06-01"));

        assert_eq!(points.points_this_month, 15);
        assert_eq!(points.month_start, date("2024-06-01"));
        // Friday 31st and Saturday 1st share a week
        assert_eq!(points.points_this_week, 55);
    }

    #[test]
    fn test_backfill_into_previous_week_only_counts_total() {
        let mut points = UserPoints::first_award("user-1", 10, date("2024-05-20"));
        points.award(25, date("2024-05-17"));

        assert_eq!(points.total_points, 35);
        assert_eq!(points.points_this_week, 10);
        assert_eq!(points.week_start, date("2024-05-20"));
        assert_eq!(points.points_this_month, 35);
    }

    #[test]
    fn test_levels() {
        assert_eq!(level_for(0), 1);
        assert_eq!(level_for(999), 1);
        assert_eq!(level_for(1000), 2);
        assert_eq!(level_for(4321), 5);
        assert_eq!(level_for(-50), 1);

        let mut points = UserPoints::first_award("user-1", 990, date("2024-01-01"));
        points.award(10, date("2024-01-02"));
        assert_eq!(points.level, 2);
    }

    #[test]
    fn test_week_and_month_start() {
        assert_eq!(week_start(date("2024-01-01")), date("2024-01-01"));
        assert_eq!(week_start(date("2024-01-07")), date("2024-01-01"));
        assert_eq!(month_start(date("2024-02-29")), date("2024-02-01"));
    }
}
