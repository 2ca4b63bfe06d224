//! Subscription tasks carried by the task queue.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `{"type": "subscribe" | "unsubscribe", "symbol": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SubscriptionTask {
    Subscribe { symbol: String },
    Unsubscribe { symbol: String },
}

impl SubscriptionTask {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Subscribe { symbol } | Self::Unsubscribe { symbol } => symbol,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }

    pub fn to_body(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_body(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

impl fmt::Display for SubscriptionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.symbol())
    }
}
