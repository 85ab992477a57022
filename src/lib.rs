//! Streakline - habit streaks and points.
//!
//! # Overview
//!
//! Each habit carries a streak: how many consecutive days it has been
//! completed, the longest run so far, and the day it was last done.
//! Completing a habit advances or restarts the streak and awards points
//! scaled by the habit's difficulty, with a bonus for every full week of
//! streak.
//!
//! The rules live in [`engine`] as a pure function over the prior state and
//! the completion date. Everything else exists to feed it and persist what
//! it returns.
//!
//! # Modules
//!
//! - [`engine`]: Streak and points computation
//! - [`points`]: Per-user running points totals and levels
//! - [`model`]: Habits, completions and request/response types
//! - [`clock`]: Where "today" comes from
//! - [`store`]: Storage backends behind the `HabitStore` trait
//! - [`service`]: Habit operations with per-habit serialization
//! - [`api`]: HTTP API handlers
//! - [`config`]: Environment configuration

pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod model;
pub mod points;
pub mod service;
pub mod store;
