//! Per-reminder delivery state machine.

pub mod dispatcher;

pub use dispatcher::{DeliveryDispatcher, DispatchOutcome, DispatchSettings, SkipReason};
