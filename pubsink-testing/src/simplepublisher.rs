//! An in-memory [`Publisher`] for testing sinks.
//!
//! The outcome of every publish is decided when it is dispatched, so tests can tell exactly
//! which publishes fail from the [`ErrorInjector`] settings. Completions can be delayed with
//! a latency, or held back until [`SimplePublisher::release`] to control the order in which
//! they race with a drain. [`SimplePublisher::fail`] simulates a permanent failure of the
//! publisher and notifies every registered failure listener.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures::FutureExt;
use parking_lot::Mutex;
use pubsink_core::{
    FailureListener, Message, MessageMetadata, PublishError, PublishFuture, Publisher,
    PublisherFactory, PublisherOptions, Result,
};
use tokio::sync::oneshot;
use tonic::Code;

mod error_injector;
pub use error_injector::ErrorInjector;

/// Publisher that records every message it is handed.
///
/// Clones share the same state, so a test can keep one clone for inspection while the sink
/// owns another.
#[derive(Clone)]
pub struct SimplePublisher {
    inner: Arc<Inner>,
}

struct Inner {
    topic: String,
    error_injector: Arc<ErrorInjector>,
    published: Mutex<Vec<Message>>,
    dispatched: AtomicUsize,
    next_offset: AtomicU64,
    held: Mutex<Vec<oneshot::Sender<()>>>,
    listeners: Mutex<Vec<FailureListener>>,
    failure: Mutex<Option<PublishError>>,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

impl SimplePublisher {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                topic: topic.into(),
                error_injector: Arc::new(ErrorInjector::new()),
                published: Mutex::new(Vec::new()),
                dispatched: AtomicUsize::new(0),
                next_offset: AtomicU64::new(0),
                held: Mutex::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
                started: AtomicUsize::new(0),
                stopped: AtomicUsize::new(0),
            }),
        }
    }

    /// The error returned for the `seq`-th publish (1-based) when the injector fails it.
    pub fn injected_error(seq: usize, code: Code) -> PublishError {
        PublishError::new(code, format!("injected publish failure #{seq}"))
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn error_injector(&self) -> &Arc<ErrorInjector> {
        &self.inner.error_injector
    }

    /// Number of publishes dispatched so far.
    pub fn dispatch_count(&self) -> usize {
        self.inner.dispatched.load(Ordering::SeqCst)
    }

    /// Every dispatched message, in dispatch order.
    pub fn published(&self) -> Vec<Message> {
        self.inner.published.lock().clone()
    }

    /// Number of completions currently held back.
    pub fn held_count(&self) -> usize {
        self.inner.held.lock().len()
    }

    /// Lets every held completion resolve. Returns how many were released.
    pub fn release(&self) -> usize {
        let held: Vec<_> = self.inner.held.lock().drain(..).collect();
        let released = held.len();
        for tx in held {
            // the receiver is gone if the publish future was dropped
            let _ = tx.send(());
        }
        released
    }

    /// Fails the publisher permanently. Every later publish fails with `error` and every
    /// registered failure listener is notified, on the calling thread.
    pub fn fail(&self, error: PublishError) {
        *self.inner.failure.lock() = Some(error.clone());
        let listeners = self.inner.listeners.lock();
        for listener in listeners.iter() {
            listener(error.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    pub fn start_count(&self) -> usize {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

impl Publisher for SimplePublisher {
    fn publish(&self, message: Message) -> PublishFuture {
        let inner = &self.inner;
        let seq = inner.dispatched.fetch_add(1, Ordering::SeqCst) + 1;
        inner.published.lock().push(message);

        let failure = inner.failure.lock().clone();
        let outcome = match failure {
            Some(error) => Err(error),
            None if inner.error_injector.should_fail_publish() => Err(Self::injected_error(
                seq,
                inner.error_injector.failure_code(),
            )),
            None => Ok(MessageMetadata {
                partition: 0,
                offset: inner.next_offset.fetch_add(1, Ordering::SeqCst),
            }),
        };

        let held = if inner.error_injector.is_holding() {
            let (tx, rx) = oneshot::channel();
            inner.held.lock().push(tx);
            Some(rx)
        } else {
            None
        };

        let error_injector = Arc::clone(&inner.error_injector);
        async move {
            error_injector.apply_publish_latency().await;
            if let Some(rx) = held {
                // a dropped sender releases the completion as well
                let _ = rx.await;
            }
            outcome
        }
        .boxed()
    }

    fn add_failure_listener(&self, listener: FailureListener) {
        self.inner.listeners.lock().push(listener);
    }

    fn start(&self) -> Result<()> {
        self.inner.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.inner.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that hands out clones of one [`SimplePublisher`].
pub struct SimplePublisherFactory {
    publisher: SimplePublisher,
    created: AtomicUsize,
}

impl SimplePublisherFactory {
    pub fn new(publisher: SimplePublisher) -> Self {
        Self {
            publisher,
            created: AtomicUsize::new(0),
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl PublisherFactory for SimplePublisherFactory {
    fn create(&self, _options: &PublisherOptions) -> Result<Arc<dyn Publisher>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.publisher.clone()))
    }
}
