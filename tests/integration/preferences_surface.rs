//! Preference reads and partial updates against a file-backed store.

use std::sync::Arc;
use std::time::Duration;

use reminder_relay::channels::Channel;
use reminder_relay::preferences::{
    LocalTtlCache, PreferenceDefaults, PreferenceError, PreferenceResolver, PreferenceUpdate,
};
use reminder_relay::store::SqliteReminderStore;
use reminder_relay::FixedClock;

use crate::helpers::{add_user, noon};

fn resolver(store: Arc<SqliteReminderStore>, ttl: Duration) -> PreferenceResolver {
    PreferenceResolver::new(
        store,
        Arc::new(LocalTtlCache::new(64)),
        ttl,
        PreferenceDefaults::default(),
        Arc::new(FixedClock::new(noon())),
    )
}

fn open(dir: &std::path::Path) -> Arc<SqliteReminderStore> {
    Arc::new(SqliteReminderStore::open(&dir.join("relay.db"), Duration::from_secs(5)).unwrap())
}

#[tokio::test]
async fn partial_updates_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    add_user(&store, "u-1");
    let prefs = resolver(store, Duration::from_secs(300));

    assert!(prefs.get_preferences("u-1").await.unwrap().is_none());

    prefs
        .upsert_preferences(
            "u-1",
            &PreferenceUpdate {
                channel_priority: Some(vec![Channel::Sms, Channel::Email]),
                sms_enabled: Some(true),
                ..PreferenceUpdate::default()
            },
        )
        .await
        .unwrap();
    let update: PreferenceUpdate =
        serde_json::from_str(r#"{"quiet_hours_start": "22:00", "quiet_hours_end": "07:00"}"#)
            .unwrap();
    prefs.upsert_preferences("u-1", &update).await.unwrap();

    let pref = prefs.get_preferences("u-1").await.unwrap().unwrap();
    assert_eq!(pref.channel_priority, vec![Channel::Sms, Channel::Email]);
    assert!(pref.sms_enabled);
    assert!(pref.email_enabled);
    assert_eq!(pref.quiet_hours_start.as_deref(), Some("22:00"));
    assert_eq!(pref.quiet_hours_end.as_deref(), Some("07:00"));

    let clear: PreferenceUpdate =
        serde_json::from_str(r#"{"quiet_hours_start": null, "quiet_hours_end": null}"#).unwrap();
    let cleared = prefs.upsert_preferences("u-1", &clear).await.unwrap();
    assert_eq!(cleared.quiet_hours_start, None);
    assert_eq!(cleared.quiet_hours_end, None);
    assert_eq!(cleared.channel_priority, vec![Channel::Sms, Channel::Email]);
}

#[tokio::test]
async fn malformed_update_is_rejected_and_nothing_is_saved() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    add_user(&store, "u-1");
    let prefs = resolver(store, Duration::from_secs(300));

    let err = prefs
        .upsert_preferences(
            "u-1",
            &PreferenceUpdate {
                quiet_hours_start: Some(Some("25:99".to_owned())),
                ..PreferenceUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PreferenceError::Invalid(_)));
    assert!(prefs.get_preferences("u-1").await.unwrap().is_none());
}

#[tokio::test]
async fn writes_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(dir.path());
        add_user(&store, "u-1");
        resolver(store, Duration::from_secs(300))
            .upsert_preferences(
                "u-1",
                &PreferenceUpdate {
                    push_enabled: Some(false),
                    utc_offset_minutes: Some(-300),
                    ..PreferenceUpdate::default()
                },
            )
            .await
            .unwrap();
    }

    let prefs = resolver(open(dir.path()), Duration::from_secs(300));
    let pref = prefs.get_preferences("u-1").await.unwrap().unwrap();
    assert!(!pref.push_enabled);
    assert_eq!(pref.utc_offset_minutes, -300);
}

#[tokio::test]
async fn other_process_writes_show_up_after_the_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    add_user(&store, "u-1");
    let reader = resolver(store, Duration::from_millis(50));
    let writer = resolver(open(dir.path()), Duration::from_millis(50));

    writer
        .upsert_preferences(
            "u-1",
            &PreferenceUpdate {
                email_enabled: Some(true),
                ..PreferenceUpdate::default()
            },
        )
        .await
        .unwrap();
    assert!(reader.get_preferences("u-1").await.unwrap().unwrap().email_enabled);

    writer
        .upsert_preferences(
            "u-1",
            &PreferenceUpdate {
                email_enabled: Some(false),
                ..PreferenceUpdate::default()
            },
        )
        .await
        .unwrap();
    // Still served from the reader's own cache.
    assert!(reader.get_preferences("u-1").await.unwrap().unwrap().email_enabled);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!reader.get_preferences("u-1").await.unwrap().unwrap().email_enabled);
}

#[tokio::test]
async fn get_or_create_persists_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    add_user(&store, "u-1");
    let prefs = resolver(store.clone(), Duration::from_secs(300));

    let created = prefs.get_or_create_preferences("u-1").await.unwrap();
    assert_eq!(created.channel_priority, Channel::ALL.to_vec());
    assert!(!created.sms_enabled);

    let fresh = resolver(store, Duration::from_secs(300));
    assert_eq!(fresh.get_preferences("u-1").await.unwrap(), Some(created));
}
