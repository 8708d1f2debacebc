//! End to end behaviour of the sink controller against an in-memory publisher, with
//! completions racing the foreground on a multi-threaded runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use pubsink_core::{
    Error, Message, PublishError, PublisherCache, PublisherFactory, PublisherOptions, SinkController, metrics,
};
use pubsink_testing::simplepublisher::{SimplePublisher, SimplePublisherFactory};
use tokio::runtime::Runtime;
use tonic::Code;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn fresh_sink(runtime: &Runtime, publisher: &SimplePublisher) -> SinkController {
    SinkController::builder(PublisherOptions::new(publisher.topic()).with_cache(false))
        .factory(Arc::new(SimplePublisherFactory::new(publisher.clone())))
        .runtime(runtime.handle().clone())
        .build()
        .unwrap()
}

fn injected(seq: usize) -> PublishError {
    SimplePublisher::injected_error(seq, Code::Unavailable)
}

/// Sorted messages of `errors`, for comparing failures regardless of completion order.
fn messages(errors: impl IntoIterator<Item = PublishError>) -> Vec<String> {
    let mut messages: Vec<_> = errors
        .into_iter()
        .map(|e| e.message().to_string())
        .collect();
    messages.sort();
    messages
}

fn cause_messages(err: &Error) -> Vec<String> {
    messages(err.causes().into_iter().cloned())
}

#[test]
fn test_drain_after_successful_publishes() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    publisher.error_injector().set_publish_latency(2);
    let sink = fresh_sink(&runtime, &publisher);

    for i in 0..10 {
        sink.process(Message::new(format!("message-{i}"))).unwrap();
    }
    assert_eq!(sink.drain(), Ok(()));
    assert_eq!(sink.outstanding(), 0);
    assert_eq!(publisher.dispatch_count(), 10);

    // a fresh publisher is started once and never stopped by the sink
    assert_eq!(publisher.start_count(), 1);
    assert_eq!(publisher.stop_count(), 0);
}

#[test]
fn test_drain_reports_single_failure() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    publisher.error_injector().skip_publishes_then_fail(1, 1);
    let sink = fresh_sink(&runtime, &publisher);

    for i in 0..3 {
        sink.process(Message::new(format!("message-{i}"))).unwrap();
    }
    assert_eq!(
        sink.drain(),
        Err(Error::Publish {
            primary: injected(2),
            suppressed: vec![],
        })
    );
    assert_eq!(sink.outstanding(), 0);
}

#[test]
fn test_drain_combines_multiple_failures() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    publisher.error_injector().fail_publishes(2);
    let sink = fresh_sink(&runtime, &publisher);

    for i in 0..4 {
        sink.process(Message::new(format!("message-{i}"))).unwrap();
    }
    let err = sink.drain().unwrap_err();
    let Error::Publish {
        primary,
        suppressed,
    } = &err
    else {
        panic!("expected a publish error, got {err:?}");
    };
    assert_eq!(suppressed.len(), 1);

    // completion order is arbitrary, but both failures are reported exactly once
    assert_eq!(cause_messages(&err), messages([injected(1), injected(2)]));
    assert!(suppressed.iter().all(|e| e != primary));
    assert!(err.to_string().contains("(1 more suppressed)"));
}

#[test]
fn test_drain_forgets_reported_failures() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    let sink = fresh_sink(&runtime, &publisher);

    // checkpoint 1: publish #2 fails
    publisher.error_injector().skip_publishes_then_fail(1, 1);
    sink.process(Message::new("a")).unwrap();
    sink.process(Message::new("b")).unwrap();
    assert!(sink.drain().is_err());
    assert_eq!(sink.pending_errors(), 0);

    // checkpoint 2: all good
    sink.process(Message::new("c")).unwrap();
    assert_eq!(sink.drain(), Ok(()));

    // checkpoint 3: publish #4 fails and only that one is reported
    publisher.error_injector().fail_publishes(1);
    sink.process(Message::new("d")).unwrap();
    assert_eq!(
        sink.drain(),
        Err(Error::Publish {
            primary: injected(4),
            suppressed: vec![],
        })
    );
    assert_eq!(sink.drain(), Ok(()));
}

#[test]
fn test_fail_fast_after_terminal_failure() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    let sink = fresh_sink(&runtime, &publisher);

    sink.process(Message::new("before")).unwrap();
    assert_eq!(sink.drain(), Ok(()));

    let terminal = PublishError::new(Code::PermissionDenied, "topic deleted");
    let failing = publisher.clone();
    let error = terminal.clone();
    thread::spawn(move || failing.fail(error)).join().unwrap();

    assert_eq!(
        sink.process(Message::new("after")),
        Err(Error::Publisher(terminal.clone()))
    );
    // nothing was dispatched or counted for the rejected message
    assert_eq!(publisher.dispatch_count(), 1);
    assert_eq!(sink.outstanding(), 0);

    // the terminal failure is reported by every later drain
    assert_eq!(sink.drain(), Err(Error::Publisher(terminal.clone())));
    assert_eq!(sink.drain(), Err(Error::Publisher(terminal)));
}

#[test]
fn test_message_failures_reported_before_terminal_failure() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    publisher.error_injector().hold_completions(true);
    publisher.error_injector().fail_publishes(1);
    let sink = fresh_sink(&runtime, &publisher);

    sink.process(Message::new("doomed")).unwrap();
    let terminal = PublishError::new(Code::Unavailable, "connection lost");
    publisher.fail(terminal.clone());
    assert_eq!(publisher.release(), 1);

    assert_eq!(
        sink.drain(),
        Err(Error::Publish {
            primary: injected(1),
            suppressed: vec![],
        })
    );
    assert_eq!(sink.drain(), Err(Error::Publisher(terminal)));
}

#[test]
fn test_outstanding_balances_in_any_completion_order() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    publisher.error_injector().hold_completions(true);
    let sink = fresh_sink(&runtime, &publisher);

    for i in 0..20 {
        sink.process(Message::new(format!("message-{i}"))).unwrap();
    }
    assert_eq!(sink.outstanding(), 20);
    assert_eq!(publisher.held_count(), 20);

    publisher.error_injector().hold_completions(false);
    assert_eq!(publisher.release(), 20);
    assert_eq!(sink.drain(), Ok(()));
    assert_eq!(sink.outstanding(), 0);
}

#[test]
fn test_drain_blocks_until_all_complete() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    publisher.error_injector().hold_completions(true);
    let sink = fresh_sink(&runtime, &publisher);

    for i in 0..5 {
        sink.process(Message::new(format!("message-{i}"))).unwrap();
    }

    let drained = AtomicBool::new(false);
    thread::scope(|s| {
        let drain = s.spawn(|| {
            let result = sink.drain();
            drained.store(true, Ordering::SeqCst);
            result
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!drained.load(Ordering::SeqCst));
        assert_eq!(sink.outstanding(), 5);

        assert_eq!(publisher.release(), 5);
        assert_eq!(drain.join().unwrap(), Ok(()));
    });
    assert!(drained.load(Ordering::SeqCst));
    assert_eq!(sink.outstanding(), 0);
}

#[test]
fn test_concurrent_process_and_completion() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    publisher.error_injector().set_publish_latency(1);
    publisher.error_injector().skip_publishes_then_fail(50, 30);
    let sink = fresh_sink(&runtime, &publisher);

    thread::scope(|s| {
        for t in 0..8 {
            let sink = &sink;
            s.spawn(move || {
                for i in 0..25 {
                    sink.process(Message::new(format!("thread-{t}-message-{i}")))
                        .unwrap();
                }
            });
        }
    });

    let err = sink.drain().unwrap_err();
    assert_eq!(err.causes().len(), 30);
    assert_eq!(cause_messages(&err), messages((51..=80).map(injected)));

    assert_eq!(sink.outstanding(), 0);
    assert_eq!(publisher.dispatch_count(), 200);
    assert_eq!(sink.drain(), Ok(()));
}

#[test]
fn test_cached_publisher_is_shared_and_not_restarted() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    let factory = Arc::new(SimplePublisherFactory::new(publisher.clone()));
    let cache = Arc::new(PublisherCache::new(Arc::clone(&factory) as Arc<dyn PublisherFactory>));
    let options = PublisherOptions::new("orders");

    let sinks: Vec<_> = (0..2)
        .map(|_| {
            SinkController::builder(options.clone())
                .cache(Arc::clone(&cache))
                .runtime(runtime.handle().clone())
                .build()
                .unwrap()
        })
        .collect();

    // created and started once by the cache, never by the sinks
    assert_eq!(factory.created_count(), 1);
    assert_eq!(publisher.start_count(), 1);
    assert_eq!(publisher.listener_count(), 2);

    for sink in &sinks {
        sink.process(Message::new("shared")).unwrap();
        assert_eq!(sink.drain(), Ok(()));
    }
    assert_eq!(publisher.dispatch_count(), 2);
    assert_eq!(publisher.stop_count(), 0);

    // a terminal failure of the shared publisher reaches every sink
    let terminal = PublishError::new(Code::Unavailable, "connection lost");
    publisher.fail(terminal.clone());
    for sink in &sinks {
        assert_eq!(
            sink.process(Message::new("late")),
            Err(Error::Publisher(terminal.clone()))
        );
    }

    cache.shutdown().unwrap();
    assert_eq!(publisher.stop_count(), 1);
}

#[test]
fn test_failure_after_sink_dropped() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    let cache = Arc::new(PublisherCache::new(Arc::new(SimplePublisherFactory::new(
        publisher.clone(),
    ))));

    let sink = SinkController::builder(PublisherOptions::new("orders"))
        .cache(Arc::clone(&cache))
        .runtime(runtime.handle().clone())
        .build()
        .unwrap();
    sink.process(Message::new("one")).unwrap();
    assert_eq!(sink.drain(), Ok(()));
    drop(sink);

    // the listener of the dropped sink is still registered and must be a no-op
    assert_eq!(publisher.listener_count(), 1);
    publisher.fail(PublishError::new(Code::Unavailable, "connection lost"));
}

/// Drains on another thread, giving up after `timeout`.
fn drain_within(
    sink: Arc<SinkController>,
    timeout: Duration,
) -> Option<pubsink_core::Result<()>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(sink.drain());
    });
    rx.recv_timeout(timeout).ok()
}

fn cancelled() -> PublishError {
    PublishError::new(Code::Cancelled, "publish was abandoned before it completed")
}

#[test]
fn test_runtime_shutdown_cancels_pending_publishes() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    publisher.error_injector().hold_completions(true);
    let sink = Arc::new(fresh_sink(&runtime, &publisher));

    sink.process(Message::new("a")).unwrap();
    assert_eq!(sink.outstanding(), 1);

    // the completion task goes away with the runtime, before the publish resolves
    drop(runtime);
    publisher.release();

    assert_eq!(
        drain_within(Arc::clone(&sink), Duration::from_secs(2)),
        Some(Err(Error::Publish {
            primary: cancelled(),
            suppressed: vec![],
        }))
    );
    assert_eq!(sink.outstanding(), 0);
    assert_eq!(publisher.dispatch_count(), 1);
}

#[test]
fn test_process_after_runtime_shutdown() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    let sink = Arc::new(fresh_sink(&runtime, &publisher));
    drop(runtime);

    // dispatched, but nothing is left to await the publish
    sink.process(Message::new("late")).unwrap();
    assert_eq!(
        drain_within(Arc::clone(&sink), Duration::from_secs(2)),
        Some(Err(Error::Publish {
            primary: cancelled(),
            suppressed: vec![],
        }))
    );
    assert_eq!(sink.outstanding(), 0);
}

#[test]
fn test_outstanding_gauge_sums_sinks_sharing_a_topic() {
    let runtime = runtime();
    let topic = "outstanding-gauge-topic";
    let publisher = SimplePublisher::new(topic);
    publisher.error_injector().hold_completions(true);
    let cache = Arc::new(PublisherCache::new(Arc::new(SimplePublisherFactory::new(
        publisher.clone(),
    ))));
    let build = || {
        SinkController::builder(PublisherOptions::new(topic))
            .cache(Arc::clone(&cache))
            .runtime(runtime.handle().clone())
            .build()
            .unwrap()
    };
    let first = build();
    let second = build();

    first.process(Message::new("a")).unwrap();
    first.process(Message::new("b")).unwrap();
    second.process(Message::new("c")).unwrap();

    let gauge = |value: i64| format!(r#"pubsink_outstanding{{topic="{topic}"}} {value}"#);
    let encoded = metrics::encode().unwrap();
    assert!(encoded.contains(&gauge(3)), "{encoded}");

    publisher.error_injector().hold_completions(false);
    publisher.release();
    assert_eq!(first.drain(), Ok(()));
    assert_eq!(second.drain(), Ok(()));

    let encoded = metrics::encode().unwrap();
    assert!(encoded.contains(&gauge(0)), "{encoded}");
}

#[test]
fn test_terminal_failure_while_processing() {
    let runtime = runtime();
    let publisher = SimplePublisher::new("orders");
    let sink = fresh_sink(&runtime, &publisher);
    let terminal = PublishError::new(Code::Unavailable, "connection lost");

    let accepted: usize = thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|t| {
                let sink = &sink;
                let terminal = &terminal;
                s.spawn(move || {
                    let mut accepted = 0;
                    for i in 0..200_000 {
                        match sink.process(Message::new(format!("thread-{t}-message-{i}"))) {
                            Ok(()) => accepted += 1,
                            Err(e) => {
                                assert_eq!(e, Error::Publisher(terminal.clone()));
                                return (accepted, true);
                            }
                        }
                    }
                    (accepted, false)
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(10));
        publisher.fail(terminal.clone());

        workers
            .into_iter()
            .map(|w| {
                let (accepted, rejected) = w.join().unwrap();
                assert!(rejected, "every thread sees the failure");
                accepted
            })
            .sum()
    });

    // rejected messages are never dispatched
    assert_eq!(publisher.dispatch_count(), accepted);
    assert!(sink.process(Message::new("after")).is_err());
    assert_eq!(publisher.dispatch_count(), accepted);

    // messages dispatched between the publisher failing and the sink learning of it fail
    // with the terminal error
    match sink.drain() {
        Err(Error::Publish { .. }) | Err(Error::Publisher(_)) => {}
        other => panic!("expected a failed drain, got {other:?}"),
    }
    assert_eq!(sink.outstanding(), 0);
    assert_eq!(sink.drain(), Err(Error::Publisher(terminal)));
}
