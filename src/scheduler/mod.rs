//! Randomized notification scheduling.
//!
//! - `cycle`: one pass over communities with per-community dedupe.
//! - `runner`: the timer loop and its [`SchedulerHandle`].

pub mod cycle;
pub mod runner;

pub use cycle::{CommunityOutcome, CycleReport, CycleRunner};
pub use runner::{NotificationScheduler, SchedulerHandle, SchedulerPhase};
