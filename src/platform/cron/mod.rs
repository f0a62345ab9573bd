//! Recurring task scheduling.

mod expression;
mod scheduler;
mod state;

pub use expression::parse_schedule;
pub use scheduler::{NEVER_FIRED_LOOKBACK, Scheduler, is_due, next_fire};
pub use state::SchedulerState;

#[cfg(test)]
mod tests;
