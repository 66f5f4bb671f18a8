//! Delivery channels and the provider gateway.
//!
//! The set of channels is closed: [`Channel`] names every transport the
//! relay can deliver through, and each variant is served by exactly one
//! [`NotificationProvider`]. Anything else is rejected when parsed, with
//! [`UnsupportedChannel`], rather than failing later at send time.

pub mod email;
pub mod gateway;
pub mod http;
pub mod message;
pub mod traits;
pub mod webhook;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use gateway::ProviderGateway;
pub use traits::{DeliveryError, DeliveryReceipt, NotificationGateway, NotificationProvider};

/// Delivery transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Push,
}

impl Channel {
    /// Every supported channel, in default priority order.
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Push, Channel::Sms];

    /// Lowercase identifier used in preferences and notification logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
        }
    }

    /// Uppercase label stored on the reminder after a successful send.
    pub fn label(self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
            Self::Push => "PUSH",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A channel name outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported channel `{0}`; supported channels: email, sms, push")]
pub struct UnsupportedChannel(pub String);

impl FromStr for Channel {
    type Err = UnsupportedChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "push" => Ok(Self::Push),
            _ => Err(UnsupportedChannel(s.to_owned())),
        }
    }
}
