//! Publishes messages asynchronously on behalf of a batching host and drains them at
//! checkpoints.
//!
//! The host sets up a [`SinkController`] once, calls [`SinkController::process`] for every
//! message and [`SinkController::drain`] at every checkpoint (bundle boundary). The
//! controller counts publishes in flight, collects their failures and reports them at the
//! next drain, and fails fast once the publisher itself has failed.

pub use crate::error::{Error, PublishError, Result};

/// Errors and their canonical status codes.
pub mod error;

/// Publisher options and how they are read from the environment.
pub mod config;

/// Messages handed to the publisher and the metadata it returns.
pub mod message;

/// The publisher client interface and the builtin publishers.
pub mod publisher;

/// Process-wide sharing of publishers between sinks.
pub mod cache;

/// Prometheus metrics of the sinks in this process.
pub mod metrics;

/// The sink controller: dispatch and drain.
pub mod sink;

mod accumulator;
mod state;
mod tracker;

pub use cache::PublisherCache;
pub use config::PublisherOptions;
pub use message::{Message, MessageMetadata};
pub use publisher::{FailureListener, PublishFuture, Publisher, PublisherFactory};
pub use sink::{SinkController, SinkControllerBuilder};
