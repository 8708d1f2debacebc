use std::collections::VecDeque;

use crate::error::{Error, PublishError};

/// Failed publishes collected since the last drain, most recent first.
#[derive(Debug, Default)]
pub(crate) struct ErrorAccumulator {
    errors: VecDeque<PublishError>,
}

impl ErrorAccumulator {
    pub(crate) fn push(&mut self, error: PublishError) {
        self.errors.push_front(error);
    }

    pub(crate) fn len(&self) -> usize {
        self.errors.len()
    }

    /// Empties the log into a single error. The first entry popped becomes the primary
    /// cause, the rest follow in pop order as suppressed causes.
    pub(crate) fn drain_and_combine(&mut self) -> Option<Error> {
        let primary = self.errors.pop_front()?;
        let suppressed = self.errors.drain(..).collect();
        Some(Error::Publish {
            primary,
            suppressed,
        })
    }
}
