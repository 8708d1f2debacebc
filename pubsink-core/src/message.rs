use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// The message handed to a publisher. The sink never looks inside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Ordering/partitioning key, may be empty.
    pub key: Bytes,
    /// The message payload.
    pub payload: Bytes,
    /// User-defined attributes of the message.
    pub attributes: HashMap<String, String>,
    pub event_time: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = key.into();
        self
    }
}

/// Where a published message landed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    pub partition: u32,
    pub offset: u64,
}
