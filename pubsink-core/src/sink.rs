//! The sink controller publishes messages without waiting for them, and blocks at every
//! checkpoint until all of them have completed.
//!
//! ```text
//!   process ──► [check state, increment, dispatch] ──► publisher
//!                                                          │ (any thread)
//!   drain ──► wait until outstanding == 0 ◄── [decrement, record failure] ◄┘
//!               └─► per-message failures, else terminal failure, else Ok
//! ```
//!
//! A single lock guards the publisher state, the outstanding count and the failure log, so
//! the foreground caller, the completion tasks and the failure listener always observe them
//! consistently. The controller is built once and reused across checkpoints. Draining
//! never stops or replaces the publisher, which may be shared with other sinks.

use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tonic::Code;
use tracing::{debug, error, info, warn};

use crate::accumulator::ErrorAccumulator;
use crate::cache::PublisherCache;
use crate::config::PublisherOptions;
use crate::error::PublishError;
use crate::message::{Message, MessageMetadata};
use crate::metrics::{sink_metrics, topic_labels};
use crate::publisher::{Publisher, PublisherFactory};
use crate::state::PublisherState;
use crate::tracker::{self, OutstandingTracker};
use crate::{Error, Result};

/// Everything guarded by the sink's lock.
struct SinkState {
    publisher: PublisherState,
    outstanding: OutstandingTracker,
    errors: ErrorAccumulator,
}

/// State shared between the controller, its completion tasks and the failure listener.
struct Shared {
    state: Mutex<SinkState>,
    /// Signalled whenever the outstanding count is decremented.
    idle: Condvar,
    labels: Vec<(String, String)>,
}

impl Shared {
    fn mark_failed(&self, error: PublishError) {
        warn!(error = %error, "Publisher failed permanently");
        self.state.lock().publisher.mark_failed(error);
    }

    /// Runs once per dispatched message, on whichever thread the publish resolved on.
    fn complete(&self, result: std::result::Result<MessageMetadata, PublishError>) {
        let failure = {
            let mut state = self.state.lock();
            state.outstanding.decrement();
            sink_metrics().outstanding.get_or_create(&self.labels).dec();
            // decrement and record in one critical section, so a drain woken by this
            // decrement always sees the failure
            match result {
                Ok(_) => None,
                Err(e) => {
                    state.errors.push(e.clone());
                    Some(e)
                }
            }
        };
        self.idle.notify_all();

        match failure {
            Some(e) => {
                sink_metrics()
                    .publish_failed_total
                    .get_or_create(&self.labels)
                    .inc();
                error!(error = %e, "Failed to publish message");
            }
            None => debug!("Published message"),
        }
    }
}

/// Owned by the task awaiting one publish. Completes the publish exactly once, with a
/// cancellation if the task is dropped before the publish resolved (e.g. the runtime
/// shut down).
struct Completion {
    shared: Option<Arc<Shared>>,
}

impl Completion {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared: Some(shared),
        }
    }

    fn complete(mut self, result: std::result::Result<MessageMetadata, PublishError>) {
        if let Some(shared) = self.shared.take() {
            shared.complete(result);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.complete(Err(PublishError::new(
                Code::Cancelled,
                "publish was abandoned before it completed",
            )));
        }
    }
}

/// Publishes messages asynchronously and enforces a drain barrier at checkpoints.
///
/// Built (set up) once with [`SinkController::builder`]. Afterwards [`process`] is called
/// for every message and [`drain`] at every checkpoint. Failures of individual messages are
/// reported by the next drain only, a permanent publisher failure is reported by every
/// later call.
///
/// [`process`]: SinkController::process
/// [`drain`]: SinkController::drain
pub struct SinkController {
    options: PublisherOptions,
    shared: Arc<Shared>,
    runtime: Handle,
}

impl SinkController {
    pub fn builder(options: PublisherOptions) -> SinkControllerBuilder {
        SinkControllerBuilder::new(options)
    }

    /// Dispatches `message` without waiting for it to be published.
    ///
    /// Fails only if the publisher has already failed permanently, in which case nothing is
    /// dispatched. A failure of this particular message is reported by the next
    /// [`drain`](SinkController::drain).
    pub fn process(&self, message: Message) -> Result<()> {
        let mut state = self.shared.state.lock();
        let publisher = match state.publisher.snapshot() {
            PublisherState::Active(publisher) => publisher,
            PublisherState::Failed(error) => {
                drop(state);
                sink_metrics()
                    .fail_fast_total
                    .get_or_create(&self.shared.labels)
                    .inc();
                warn!(error = %error, "Rejecting message, publisher has failed");
                return Err(Error::Publisher(error));
            }
        };

        // counted before the dispatch starts, so a drain never sees a spurious zero
        state.outstanding.increment();
        let future = publisher.publish(message);
        drop(state);

        let metrics = sink_metrics();
        metrics.publish_total.get_or_create(&self.shared.labels).inc();
        metrics.outstanding.get_or_create(&self.shared.labels).inc();

        // spawned outside the lock: a closed runtime drops the task, and with it the
        // completion, right away
        let completion = Completion::new(Arc::clone(&self.shared));
        self.runtime.spawn(async move {
            let result = future.await;
            completion.complete(result);
        });
        Ok(())
    }

    /// Blocks until every dispatched message has completed, then reports what went wrong
    /// since the previous drain.
    ///
    /// Failed messages take priority and are reported as one [`Error::Publish`], after
    /// which they are forgotten. Otherwise a permanent publisher failure is reported as
    /// [`Error::Publisher`], on this and every later drain. Blocks indefinitely if the
    /// publisher never completes a publish. A publish whose completion task was dropped
    /// with the runtime counts as failed with [`Code::Cancelled`].
    pub fn drain(&self) -> Result<()> {
        let start = Instant::now();
        let mut state = self.shared.state.lock();
        tracker::wait_until_zero(&mut state, &self.shared.idle, |s: &SinkState| {
            &s.outstanding
        });

        let failed = state.errors.len();
        let combined = state.errors.drain_and_combine();
        let terminal = state.publisher.error().cloned();
        drop(state);

        sink_metrics()
            .drain_total
            .get_or_create(&self.shared.labels)
            .inc();

        if let Some(err) = combined {
            error!(failed, elapsed = ?start.elapsed(), "Drained with failed messages");
            return Err(err);
        }
        if let Some(error) = terminal {
            return Err(Error::Publisher(error));
        }
        debug!(elapsed = ?start.elapsed(), "Drained");
        Ok(())
    }

    /// Number of dispatched messages that have not completed yet.
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding.count()
    }

    /// Number of failed messages waiting to be reported by the next drain.
    pub fn pending_errors(&self) -> usize {
        self.shared.state.lock().errors.len()
    }

    pub fn options(&self) -> &PublisherOptions {
        &self.options
    }
}

/// Sets up a [`SinkController`].
///
/// With [`PublisherOptions::uses_cache`] the publisher is taken from the [`PublisherCache`]
/// and left as it is. Otherwise a fresh publisher is created by the factory and started.
pub struct SinkControllerBuilder {
    options: PublisherOptions,
    factory: Option<Arc<dyn PublisherFactory>>,
    cache: Option<Arc<PublisherCache>>,
    runtime: Option<Handle>,
}

impl SinkControllerBuilder {
    pub fn new(options: PublisherOptions) -> Self {
        Self {
            options,
            factory: None,
            cache: None,
            runtime: None,
        }
    }

    pub fn factory(mut self, factory: Arc<dyn PublisherFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn cache(mut self, cache: Arc<PublisherCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Runtime the completion tasks are spawned on. Defaults to the current runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<SinkController> {
        let options = self.options;
        options.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| Error::Config(format!("no tokio runtime to complete publishes on: {e}")))?,
        };

        let (publisher, fresh): (Arc<dyn Publisher>, bool) = if options.uses_cache {
            let cache = self.cache.ok_or_else(|| {
                Error::Config("uses_cache is set but no publisher cache was provided".to_string())
            })?;
            (cache.get_or_create(&options)?, false)
        } else {
            let factory = self.factory.ok_or_else(|| {
                Error::Config("no publisher factory was provided".to_string())
            })?;
            (factory.create(&options)?, true)
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(SinkState {
                publisher: PublisherState::initialize(Arc::clone(&publisher)),
                outstanding: OutstandingTracker::default(),
                errors: ErrorAccumulator::default(),
            }),
            idle: Condvar::new(),
            labels: topic_labels(&options.topic),
        });

        // a cached publisher outlives this sink, so it must not keep the sink's state alive
        let listener_state: Weak<Shared> = Arc::downgrade(&shared);
        publisher.add_failure_listener(Box::new(move |error| {
            if let Some(shared) = listener_state.upgrade() {
                shared.mark_failed(error);
            }
        }));

        if fresh {
            publisher.start()?;
        }

        info!(
            topic = %options.topic,
            publisher = %options.publisher_name,
            cached = options.uses_cache,
            "Sink is ready"
        );

        Ok(SinkController {
            options,
            shared,
            runtime,
        })
    }
}
