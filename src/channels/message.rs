//! Reminder text and provider message identifiers.

use sha2::{Digest, Sha256};

use crate::store::Obligation;

use super::Channel;

/// Render the notification body for an obligation reminder.
pub fn build_reminder_message(obligation: &Obligation) -> String {
    format!(
        "Reminder: \"{}\" is due on {}.",
        obligation.title,
        obligation.due_date.format("%Y-%m-%d")
    )
}

/// Stable 16-hex-char id for a (channel, recipient, message) triple.
pub fn message_id(channel: Channel, recipient: &str, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{channel}:{recipient}:{message}").as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}
