use futures::FutureExt;
use futures::future;

use crate::message::{Message, MessageMetadata};
use crate::publisher::{FailureListener, PublishFuture, Publisher};

/// Blackhole is a publisher to emulate /dev/null
pub struct BlackholePublisher;

impl Publisher for BlackholePublisher {
    fn publish(&self, _message: Message) -> PublishFuture {
        future::ready(Ok(MessageMetadata::default())).boxed()
    }

    fn add_failure_listener(&self, _listener: FailureListener) {}
}
