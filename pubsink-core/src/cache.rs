//! Shares one started publisher between every sink configured with the same
//! [`PublisherOptions`].
//!
//! Publishers created here are started once, on creation, and only stopped by
//! [`PublisherCache::shutdown`]. Sinks that take a publisher from the cache never start or
//! stop it themselves.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::Result;
use crate::config::PublisherOptions;
use crate::publisher::{Publisher, PublisherFactory};

pub struct PublisherCache {
    factory: Arc<dyn PublisherFactory>,
    publishers: Mutex<HashMap<PublisherOptions, Arc<dyn Publisher>>>,
}

impl PublisherCache {
    pub fn new(factory: Arc<dyn PublisherFactory>) -> Self {
        Self {
            factory,
            publishers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the publisher for `options`, creating and starting it on first use.
    pub fn get_or_create(&self, options: &PublisherOptions) -> Result<Arc<dyn Publisher>> {
        // held across creation so concurrent callers never create two publishers for one key
        let mut publishers = self.publishers.lock();
        if let Some(publisher) = publishers.get(options) {
            return Ok(Arc::clone(publisher));
        }

        let publisher = self.factory.create(options)?;
        publisher.start()?;
        info!(topic = %options.topic, publisher = %options.publisher_name, "Started cached publisher");

        publishers.insert(options.clone(), Arc::clone(&publisher));
        Ok(publisher)
    }

    pub fn len(&self) -> usize {
        self.publishers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.lock().is_empty()
    }

    /// Stops and evicts every cached publisher. All publishers are stopped even if some
    /// fail to, the first failure is returned.
    pub fn shutdown(&self) -> Result<()> {
        let publishers: Vec<_> = self.publishers.lock().drain().collect();
        let mut result = Ok(());
        for (options, publisher) in publishers {
            if let Err(e) = publisher.stop() {
                warn!(topic = %options.topic, error = ?e, "Failed to stop cached publisher");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}
