//! Publisher configuration.
//!
//! [`PublisherOptions`] identifies a publisher. Two sinks configured with equal options may
//! share one publisher through the [`PublisherCache`](crate::cache::PublisherCache), which
//! is why the options are the cache key.

use std::collections::HashMap;

use serde::Deserialize;

use crate::{Error, Result};

pub const ENV_TOPIC: &str = "PUBSINK_TOPIC";
pub const ENV_PUBLISHER_NAME: &str = "PUBSINK_PUBLISHER_NAME";
pub const ENV_USE_CACHE: &str = "PUBSINK_USE_CACHE";

const DEFAULT_PUBLISHER_NAME: &str = "pubsink";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct PublisherOptions {
    /// The topic to publish to.
    pub topic: String,
    /// Name the publisher identifies itself with.
    #[serde(default = "default_publisher_name")]
    pub publisher_name: String,
    /// Acquire the publisher from the shared cache instead of creating a fresh one.
    #[serde(default = "default_uses_cache")]
    pub uses_cache: bool,
}

fn default_publisher_name() -> String {
    DEFAULT_PUBLISHER_NAME.to_string()
}

fn default_uses_cache() -> bool {
    true
}

impl PublisherOptions {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            publisher_name: default_publisher_name(),
            uses_cache: default_uses_cache(),
        }
    }

    pub fn with_publisher_name(mut self, name: impl Into<String>) -> Self {
        self.publisher_name = name.into();
        self
    }

    pub fn with_cache(mut self, uses_cache: bool) -> Self {
        self.uses_cache = uses_cache;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(Error::Config("topic must not be empty".to_string()));
        }
        if self.publisher_name.trim().is_empty() {
            return Err(Error::Config("publisher name must not be empty".to_string()));
        }
        Ok(())
    }
}

impl TryFrom<HashMap<String, String>> for PublisherOptions {
    type Error = Error;

    fn try_from(vars: HashMap<String, String>) -> Result<Self> {
        let topic = vars
            .get(ENV_TOPIC)
            .ok_or_else(|| Error::Config(format!("{ENV_TOPIC} is not set")))?;

        let mut options = PublisherOptions::new(topic.as_str());
        if let Some(name) = vars.get(ENV_PUBLISHER_NAME) {
            options.publisher_name = name.clone();
        }
        if let Some(uses_cache) = vars.get(ENV_USE_CACHE) {
            options.uses_cache = uses_cache.to_lowercase().parse().map_err(|e| {
                Error::Config(format!("parsing {ENV_USE_CACHE}={uses_cache}: {e:?}"))
            })?;
        }

        options.validate()?;
        Ok(options)
    }
}
