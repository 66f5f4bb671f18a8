//! Shared helpers for integration tests.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use reminder_relay::config::RelayConfig;
use reminder_relay::store::{NewReminder, Reminder, SqliteReminderStore, User};
use reminder_relay::{FixedClock, RelayRuntime};

/// Fixed "now" used across integration tests.
pub(crate) fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 20, 12, 0, 0).unwrap()
}

/// Config pointing the database into `dir` and every provider at `base_url`.
pub(crate) fn relay_config(dir: &Path, base_url: &str) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.store.db_path = dir.join("relay.db");
    config.delivery.timeout_secs = 2;
    config.delivery.email.api_url = Some(format!("{base_url}/email"));
    config.delivery.email.from = "reminders@example.com".to_owned();
    config.delivery.sms.url = Some(format!("{base_url}/sms"));
    config.delivery.push.url = Some(format!("{base_url}/push"));
    config.workers.concurrency = 2;
    config.workers.infra_max_attempts = 2;
    config.workers.infra_backoff_initial_ms = 5;
    config.workers.infra_backoff_max_ms = 10;
    config
}

/// Runtime built from `config` with real HTTP providers and a fixed clock.
pub(crate) fn runtime_at(config: RelayConfig, now: DateTime<Utc>) -> RelayRuntime {
    let store = Arc::new(
        SqliteReminderStore::open(
            &config.store.db_path,
            std::time::Duration::from_millis(config.store.busy_timeout_ms),
        )
        .expect("open store"),
    );
    let gateway = reminder_relay::ProviderGateway::from_config(&config.delivery)
        .expect("build gateway");
    RelayRuntime::with_parts(config, store, Arc::new(gateway), Arc::new(FixedClock::new(now)))
}

pub(crate) fn add_user(store: &SqliteReminderStore, id: &str) -> User {
    let user = User {
        id: id.to_owned(),
        email: Some(format!("{id}@example.com")),
        phone: Some("+15550100".to_owned()),
        push_token: Some(format!("device-{id}")),
    };
    store.upsert_user(&user).expect("upsert user");
    user
}

/// One obligation titled `title` with a single reminder due at `remind_at`.
pub(crate) fn due_reminder(
    store: &SqliteReminderStore,
    user_id: &str,
    title: &str,
    remind_at: DateTime<Utc>,
) -> Reminder {
    let obligation = store
        .create_obligation(user_id, title, remind_at)
        .expect("create obligation");
    store
        .create_reminder(
            &NewReminder {
                obligation_id: obligation.id,
                remind_at,
                max_retries: 3,
            },
            remind_at,
        )
        .expect("create reminder")
}
