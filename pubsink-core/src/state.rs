use std::fmt;
use std::sync::Arc;

use crate::error::PublishError;
use crate::publisher::Publisher;

/// Either the publisher messages are dispatched to, or the error it failed with.
///
/// Guarded by the sink's lock. Once failed, nothing moves it back to active.
#[derive(Clone)]
pub(crate) enum PublisherState {
    Active(Arc<dyn Publisher>),
    Failed(PublishError),
}

impl PublisherState {
    pub(crate) fn initialize(publisher: Arc<dyn Publisher>) -> Self {
        PublisherState::Active(publisher)
    }

    /// Overwrites whatever was there, last write wins.
    pub(crate) fn mark_failed(&mut self, error: PublishError) {
        *self = PublisherState::Failed(error);
    }

    pub(crate) fn snapshot(&self) -> PublisherState {
        self.clone()
    }

    pub(crate) fn error(&self) -> Option<&PublishError> {
        match self {
            PublisherState::Active(_) => None,
            PublisherState::Failed(error) => Some(error),
        }
    }
}

impl fmt::Debug for PublisherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublisherState::Active(_) => write!(f, "Active"),
            PublisherState::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
        }
    }
}
