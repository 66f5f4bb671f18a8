//! Reminder Relay: reminder dispatch and multi-channel notification delivery.
//!
//! Pending reminders are claimed from the store by a periodic scheduler and
//! fanned out to concurrent dispatch workers:
//! Scheduler → claim batch → job queue → workers → dispatcher → gateway
//!
//! # Architecture
//!
//! - **Store**: SQLite reminders, obligations, users, preferences, and the
//!   delivery audit log. The atomic claim lives here.
//! - **Scheduler**: sweeps stale claims, claims due reminders, enqueues jobs.
//! - **Workers**: pull jobs and run the dispatcher with bounded infra retry.
//! - **Dispatcher**: quiet hours, channel fallback, retry, dead-lettering.
//! - **Preferences**: cached per-user channel order and quiet hours.
//! - **Channels**: email, SMS, and push providers behind one gateway.

pub mod channels;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod policy;
pub mod preferences;
pub mod queue;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod store;

pub use channels::{Channel, NotificationGateway, ProviderGateway};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::RelayConfig;
pub use dispatch::{DeliveryDispatcher, DispatchOutcome};
pub use error::{RelayError, Result};
pub use preferences::PreferenceResolver;
pub use runtime::{RelayHandle, RelayRuntime, RunOnceReport};
pub use scheduler::Scheduler;
pub use store::{ReminderStore, SqliteReminderStore};
