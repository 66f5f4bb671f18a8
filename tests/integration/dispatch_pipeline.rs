//! End-to-end dispatch: SQLite store, scheduler, workers, and real HTTP
//! providers talking to a mock server.

use std::time::Duration;

use reminder_relay::channels::Channel;
use reminder_relay::dispatch::DispatchOutcome;
use reminder_relay::preferences::PreferenceUpdate;
use reminder_relay::queue::DispatchEvent;
use reminder_relay::store::{LogStatus, ReminderStatus, ReminderStore};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{add_user, due_reminder, noon, relay_config, runtime_at};

fn outcome_of(event: &DispatchEvent) -> &DispatchOutcome {
    match event {
        DispatchEvent::Completed { outcome, .. } => outcome,
        DispatchEvent::Abandoned { error, .. } => panic!("job abandoned: {error}"),
    }
}

#[tokio::test]
async fn user_without_preferences_is_emailed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/email"))
        .and(body_partial_json(json!({
            "from": "reminders@example.com",
            "to": "u-1@example.com",
            "subject": "Reminder Notification",
            "text": "Reminder: \"Renew passport\" is due on 2026-04-20."
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let runtime = runtime_at(relay_config(dir.path(), &server.uri()), noon());
    add_user(runtime.store(), "u-1");
    let reminder = due_reminder(runtime.store(), "u-1", "Renew passport", noon());

    let report = runtime.run_once().await.unwrap();
    assert_eq!(report.tick.claimed, 1);
    assert!(matches!(
        outcome_of(&report.events[0]),
        DispatchOutcome::Sent {
            channel: Channel::Email,
            ..
        }
    ));

    let stored = runtime.store().get_reminder(&reminder.id).unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::Sent);
    assert_eq!(stored.channel, "EMAIL");
    assert_eq!(stored.locked_at, None);

    let logs = runtime.store().logs_for_reminder(&reminder.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Sent);
    assert_eq!(logs[0].recipient, "u-1@example.com");
    assert!(logs[0].provider_message_id.is_some());
}

#[tokio::test]
async fn email_outage_falls_back_to_sms() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/email"))
        .respond_with(ResponseTemplate::new(500).set_body_string("mail relay down"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sms"))
        .and(header("authorization", "Bearer sms-secret"))
        .and(body_partial_json(json!({ "to": "+15550100" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = relay_config(dir.path(), &server.uri());
    config.delivery.sms.token = Some("sms-secret".to_owned());
    let runtime = runtime_at(config, noon());
    add_user(runtime.store(), "u-1");
    runtime
        .preferences()
        .upsert_preferences(
            "u-1",
            &PreferenceUpdate {
                channel_priority: Some(vec![Channel::Email, Channel::Sms]),
                sms_enabled: Some(true),
                ..PreferenceUpdate::default()
            },
        )
        .await
        .unwrap();
    let reminder = due_reminder(runtime.store(), "u-1", "Insurance renewal", noon());

    let report = runtime.run_once().await.unwrap();
    assert!(matches!(
        outcome_of(&report.events[0]),
        DispatchOutcome::Sent {
            channel: Channel::Sms,
            ..
        }
    ));

    let stored = runtime.store().get_reminder(&reminder.id).unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::Sent);
    assert_eq!(stored.channel, "SMS");
    assert_eq!(stored.retry_count, 0);

    let logs = runtime.store().logs_for_reminder(&reminder.id).unwrap();
    let trail: Vec<(&str, LogStatus)> = logs
        .iter()
        .map(|l| (l.channel.as_str(), l.status))
        .collect();
    assert_eq!(trail, vec![("email", LogStatus::Failed), ("sms", LogStatus::Sent)]);
    let email_error = logs[0].error_message.as_deref().unwrap();
    assert!(email_error.contains("HTTP 500"), "{email_error}");
    assert!(email_error.contains("mail relay down"), "{email_error}");
}

#[tokio::test]
async fn persistent_failure_is_dead_lettered_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/email"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let runtime = runtime_at(relay_config(dir.path(), &server.uri()), noon());
    add_user(runtime.store(), "u-1");
    let reminder = due_reminder(runtime.store(), "u-1", "Visa renewal", noon());

    for expected_retry in 1..=2 {
        let report = runtime.run_once().await.unwrap();
        assert_eq!(
            outcome_of(&report.events[0]),
            &DispatchOutcome::RetryScheduled {
                retry_count: expected_retry,
                requeue_after: None
            }
        );
        let stored = runtime.store().get_reminder(&reminder.id).unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Pending);
        assert_eq!(stored.locked_at, None);
    }

    let report = runtime.run_once().await.unwrap();
    assert!(matches!(
        outcome_of(&report.events[0]),
        DispatchOutcome::DeadLettered { .. }
    ));

    let stored = runtime.store().get_reminder(&reminder.id).unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::DeadLetter);
    assert_eq!(stored.retry_count, 3);
    assert!(stored.last_error.unwrap().contains("HTTP 503"));

    let dead = runtime.store().list_dead_letters(10).unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, reminder.id);
    assert_eq!(runtime.store().logs_for_reminder(&reminder.id).unwrap().len(), 3);

    // Terminal reminders are never claimed again.
    assert_eq!(runtime.run_once().await.unwrap().tick.claimed, 0);
}

#[tokio::test]
async fn quiet_hours_defer_without_side_effects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let runtime = runtime_at(relay_config(dir.path(), &server.uri()), noon());
    add_user(runtime.store(), "u-1");
    runtime
        .preferences()
        .upsert_preferences(
            "u-1",
            &PreferenceUpdate {
                quiet_hours_start: Some(Some("11:30".to_owned())),
                quiet_hours_end: Some(Some("12:30".to_owned())),
                ..PreferenceUpdate::default()
            },
        )
        .await
        .unwrap();
    let reminder = due_reminder(runtime.store(), "u-1", "Dentist", noon());

    let report = runtime.run_once().await.unwrap();
    assert_eq!(outcome_of(&report.events[0]), &DispatchOutcome::Deferred);

    let stored = runtime.store().get_reminder(&reminder.id).unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::Pending);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.last_error, None);
    assert!(runtime.store().logs_for_reminder(&reminder.id).unwrap().is_empty());

    // The claim is left to lapse; until the sweep it is not re-claimed.
    assert_eq!(runtime.run_once().await.unwrap().tick.claimed, 0);
}

#[tokio::test]
async fn slow_provider_counts_as_a_failed_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/email"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = relay_config(dir.path(), &server.uri());
    config.delivery.timeout_secs = 1;
    let runtime = runtime_at(config, noon());
    add_user(runtime.store(), "u-1");
    let reminder = due_reminder(runtime.store(), "u-1", "Car service", noon());

    let report = runtime.run_once().await.unwrap();
    assert!(matches!(
        outcome_of(&report.events[0]),
        DispatchOutcome::RetryScheduled { retry_count: 1, .. }
    ));
    let logs = runtime.store().logs_for_reminder(&reminder.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Failed);
}

#[tokio::test]
async fn dry_run_marks_sent_without_network() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = relay_config(dir.path(), "http://127.0.0.1:9");
    config.delivery.dry_run = true;
    let runtime = runtime_at(config, noon());
    add_user(runtime.store(), "u-1");
    let reminder = due_reminder(runtime.store(), "u-1", "Library books", noon());

    runtime.run_once().await.unwrap();
    let stored = runtime.store().get_reminder(&reminder.id).unwrap().unwrap();
    assert_eq!(stored.status, ReminderStatus::Sent);
}
