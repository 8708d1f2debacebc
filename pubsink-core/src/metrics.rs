use std::sync::OnceLock;

use prometheus_client::encoding::text::encode as encode_text;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::{Error, Result};

const TOPIC_LABEL: &str = "topic";

// The sink metrics are registered under this prefix
const SINK_REGISTRY_PREFIX: &str = "pubsink";

// Note: We do not add a suffix to the metric name, as the suffix is inferred through the metric type
// by the prometheus client library

// counters
const PUBLISH_TOTAL: &str = "publish";
const PUBLISH_FAILED_TOTAL: &str = "publish_failed";
const FAIL_FAST_TOTAL: &str = "fail_fast";
const DRAIN_TOTAL: &str = "drain";

// gauge
const OUTSTANDING: &str = "outstanding";

/// The global register of all metrics.
#[derive(Default)]
struct GlobalRegistry {
    // It is okay to use a blocking mutex because we register each metric only one time.
    registry: parking_lot::Mutex<Registry>,
}

static GLOBAL_REGISTRY: OnceLock<GlobalRegistry> = OnceLock::new();

fn global_registry() -> &'static GlobalRegistry {
    GLOBAL_REGISTRY.get_or_init(GlobalRegistry::default)
}

/// Metrics of every sink in the process, differentiated by the topic label.
pub(crate) struct SinkMetrics {
    pub(crate) publish_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) publish_failed_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) fail_fast_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) drain_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) outstanding: Family<Vec<(String, String)>, Gauge>,
}

impl SinkMetrics {
    fn new() -> Self {
        let metrics = Self {
            publish_total: Family::<Vec<(String, String)>, Counter>::default(),
            publish_failed_total: Family::<Vec<(String, String)>, Counter>::default(),
            fail_fast_total: Family::<Vec<(String, String)>, Counter>::default(),
            drain_total: Family::<Vec<(String, String)>, Counter>::default(),
            outstanding: Family::<Vec<(String, String)>, Gauge>::default(),
        };

        let mut registry = global_registry().registry.lock();
        let registry = registry.sub_registry_with_prefix(SINK_REGISTRY_PREFIX);
        registry.register(
            PUBLISH_TOTAL,
            "A Counter to keep track of the total number of messages dispatched to the publisher",
            metrics.publish_total.clone(),
        );
        registry.register(
            PUBLISH_FAILED_TOTAL,
            "A Counter to keep track of the total number of messages the publisher failed to publish",
            metrics.publish_failed_total.clone(),
        );
        registry.register(
            FAIL_FAST_TOTAL,
            "A Counter to keep track of the total number of messages rejected because the publisher had failed",
            metrics.fail_fast_total.clone(),
        );
        registry.register(
            DRAIN_TOTAL,
            "A Counter to keep track of the total number of completed drains",
            metrics.drain_total.clone(),
        );
        registry.register(
            OUTSTANDING,
            "A Gauge to keep track of the number of dispatched messages that have not completed",
            metrics.outstanding.clone(),
        );
        metrics
    }
}

static SINK_METRICS: OnceLock<SinkMetrics> = OnceLock::new();

pub(crate) fn sink_metrics() -> &'static SinkMetrics {
    SINK_METRICS.get_or_init(SinkMetrics::new)
}

pub(crate) fn topic_labels(topic: &str) -> Vec<(String, String)> {
    vec![(TOPIC_LABEL.to_string(), topic.to_string())]
}

/// Renders every registered metric in the text exposition format.
pub fn encode() -> Result<String> {
    // make sure the sink metrics are registered even if no sink was built yet
    sink_metrics();
    let registry = global_registry().registry.lock();
    let mut buffer = String::new();
    encode_text(&mut buffer, &registry)
        .map_err(|e| Error::Metrics(format!("encoding metrics: {e:?}")))?;
    Ok(buffer)
}
