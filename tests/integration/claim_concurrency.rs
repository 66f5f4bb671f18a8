//! Two relays sharing one database never deliver the same reminder twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reminder_relay::channels::{Channel, DeliveryError, DeliveryReceipt, NotificationGateway};
use reminder_relay::config::RelayConfig;
use reminder_relay::store::{ReminderStatus, SqliteReminderStore};
use reminder_relay::{FixedClock, RelayRuntime};

use crate::helpers::{add_user, due_reminder, noon};

/// Accepts everything and counts deliveries per message body.
#[derive(Default)]
struct CountingGateway {
    deliveries: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl NotificationGateway for CountingGateway {
    async fn send(
        &self,
        channel: Channel,
        _recipient: &str,
        message: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        // Give the other relay a chance to race for the same rows.
        tokio::time::sleep(Duration::from_millis(2)).await;
        *self
            .deliveries
            .lock()
            .unwrap()
            .entry(message.to_owned())
            .or_default() += 1;
        Ok(DeliveryReceipt {
            provider: channel.as_str().to_owned(),
            message_id: "counted".to_owned(),
            status: "sent".to_owned(),
        })
    }
}

fn relay(config: &RelayConfig, gateway: Arc<CountingGateway>) -> RelayRuntime {
    let store = Arc::new(
        SqliteReminderStore::open(&config.store.db_path, Duration::from_secs(30)).unwrap(),
    );
    RelayRuntime::with_parts(
        config.clone(),
        store,
        gateway,
        Arc::new(FixedClock::new(noon())),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_relays_deliver_each_reminder_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RelayConfig::default();
    config.store.db_path = dir.path().join("relay.db");
    config.scheduler.batch_size = 10;
    config.workers.concurrency = 3;

    let gateway = Arc::new(CountingGateway::default());
    let a = relay(&config, gateway.clone());
    let b = relay(&config, gateway.clone());

    add_user(a.store(), "u-1");
    let ids: Vec<String> = (0..120)
        .map(|i| due_reminder(a.store(), "u-1", &format!("Obligation {i}"), noon()).id)
        .collect();

    let (ra, rb) = tokio::join!(a.run_once(), b.run_once());
    ra.unwrap();
    rb.unwrap();

    // Contention can end a pass early; finish whatever is left.
    while a.run_once().await.unwrap().tick.claimed > 0 {}

    let deliveries = gateway.deliveries.lock().unwrap().clone();
    assert_eq!(deliveries.len(), ids.len());
    for (message, count) in &deliveries {
        assert_eq!(*count, 1, "delivered more than once: {message}");
    }

    let counts: HashMap<ReminderStatus, u64> =
        a.store().count_by_status().unwrap().into_iter().collect();
    assert_eq!(counts.get(&ReminderStatus::Sent).copied(), Some(120));
    assert_eq!(counts.get(&ReminderStatus::Pending).copied().unwrap_or(0), 0);
}
