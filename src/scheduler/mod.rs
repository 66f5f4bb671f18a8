//! Periodic dispatch trigger.
//!
//! The scheduler only claims and fans out; it never delivers.

pub mod runner;

pub use runner::{Scheduler, SchedulerSettings, TickReport};
