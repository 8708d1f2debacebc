use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future;

use crate::config::PublisherOptions;
use crate::message::{Message, MessageMetadata};
use crate::publisher::{FailureListener, PublishFuture, Publisher, PublisherFactory};

/// Logs every message and acknowledges it with the next offset.
pub struct LogPublisher {
    topic: String,
    next_offset: AtomicU64,
}

impl LogPublisher {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            next_offset: AtomicU64::new(0),
        }
    }
}

impl Publisher for LogPublisher {
    fn publish(&self, message: Message) -> PublishFuture {
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);

        let mut attributes = String::new();
        message.attributes.iter().for_each(|(k, v)| {
            attributes.push_str(&format!("{k}: {v}, "));
        });

        let log_line = format!(
            "Payload - {} Key - {} EventTime - {} Attributes - {} Offset - {}",
            &String::from_utf8_lossy(&message.payload),
            &String::from_utf8_lossy(&message.key),
            message
                .event_time
                .map(|t| t.timestamp_millis())
                .unwrap_or_default(),
            attributes,
            offset,
        );
        tracing::info!(topic = %self.topic, "{}", log_line);

        future::ready(Ok(MessageMetadata {
            partition: 0,
            offset,
        }))
        .boxed()
    }

    // never fails, so there is nothing to notify
    fn add_failure_listener(&self, _listener: FailureListener) {}
}

/// Creates a [`LogPublisher`] per topic.
pub struct LogPublisherFactory;

impl PublisherFactory for LogPublisherFactory {
    fn create(&self, options: &PublisherOptions) -> crate::Result<Arc<dyn Publisher>> {
        Ok(Arc::new(LogPublisher::new(options.topic.as_str())))
    }
}
