use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::io::{self, BufRead};
use std::sync::Arc;

use pubsink_core::publisher::log::LogPublisherFactory;
use pubsink_core::{
    Message, PublisherCache, PublisherFactory, PublisherOptions, SinkController, metrics,
};
use tracing::{debug, error, info};

mod setup_tracing;

const ENV_BUNDLE_SIZE: &str = "PUBSINK_BUNDLE_SIZE";
const DEFAULT_BUNDLE_SIZE: usize = 100;

fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run() {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

fn bundle_size(vars: &HashMap<String, String>) -> Result<usize, Box<dyn Error>> {
    let Some(size) = vars.get(ENV_BUNDLE_SIZE) else {
        return Ok(DEFAULT_BUNDLE_SIZE);
    };
    match size.parse::<usize>() {
        Ok(0) | Err(_) => {
            Err(format!("{ENV_BUNDLE_SIZE} must be a positive integer, got {size:?}").into())
        }
        Ok(size) => Ok(size),
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let vars: HashMap<String, String> = env::vars().collect();
    let bundle_size = bundle_size(&vars)?;
    let options = PublisherOptions::try_from(vars)?;
    info!(?options, bundle_size, "Starting with options");

    // completions run on the runtime's workers while this thread processes and drains
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let factory: Arc<dyn PublisherFactory> = Arc::new(LogPublisherFactory);
    let cache = Arc::new(PublisherCache::new(Arc::clone(&factory)));
    let sink = SinkController::builder(options)
        .factory(factory)
        .cache(Arc::clone(&cache))
        .runtime(runtime.handle().clone())
        .build()?;

    let mut in_bundle = 0;
    let mut bundles = 0;
    for line in io::stdin().lock().lines() {
        sink.process(Message::new(line?))?;
        in_bundle += 1;
        if in_bundle == bundle_size {
            sink.drain()?;
            bundles += 1;
            in_bundle = 0;
        }
    }
    if in_bundle > 0 {
        sink.drain()?;
        bundles += 1;
    }
    info!(bundles, "Input exhausted, all messages published");

    debug!(metrics = %metrics::encode()?, "Sink metrics");
    cache.shutdown()?;
    Ok(())
}
