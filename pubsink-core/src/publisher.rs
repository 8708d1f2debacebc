//! The publisher client as seen by the sink.
//!
//! A [`Publisher`] owns connections, batching and retries. The sink only hands it messages,
//! waits on the returned futures and listens for the publisher failing as a whole.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::PublisherOptions;
use crate::error::PublishError;
use crate::message::{Message, MessageMetadata};
use crate::Result;

pub mod blackhole;
pub mod log;

/// Resolves exactly once with the outcome of a single publish.
pub type PublishFuture = BoxFuture<'static, std::result::Result<MessageMetadata, PublishError>>;

/// Invoked when the publisher fails permanently. May be invoked more than once.
pub type FailureListener = Box<dyn Fn(PublishError) + Send + Sync>;

pub trait Publisher: Send + Sync {
    /// Starts publishing `message`.
    ///
    /// Must not block and must not invoke failure listeners from within the call: the sink
    /// dispatches while holding its own lock, and failure listeners take that lock.
    fn publish(&self, message: Message) -> PublishFuture;

    /// Registers a listener for permanent failure of this publisher.
    fn add_failure_listener(&self, listener: FailureListener);

    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Creates publishers that are not yet started.
pub trait PublisherFactory: Send + Sync {
    fn create(&self, options: &PublisherOptions) -> Result<Arc<dyn Publisher>>;
}
