use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::broadcast::error::RecvError;
use tracing::{Level, info, warn};

use lapwatch::Configuration;
use lapwatch::coordinator::CoordinatorBuilder;
use lapwatch::error::AppError;
use lapwatch::extract::SimulatedClassifier;
use lapwatch::sink::build_targets;

// Share of simulated readings that come back as misreads.
const SIMULATED_FAILURE_RATE: f64 = 0.05;

fn init_logging(level: &str) {
    let parsed = Level::from_str(level);
    tracing_subscriber::fmt()
        .with_max_level(*parsed.as_ref().unwrap_or(&Level::INFO))
        .init();
    if parsed.is_err() {
        warn!("Unknown log level '{level}', using info");
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let configuration = Configuration::load(config_path.as_deref())?;
    init_logging(&configuration.log_level);

    let targets = build_targets(&configuration.dispatch)?;
    let mut builder = CoordinatorBuilder::new(configuration)
        .configured_sources()
        .classifiers(SimulatedClassifier::full_set(SIMULATED_FAILURE_RATE));
    for sink in targets.sinks {
        builder = builder.sink(sink);
    }
    if let Some(store) = targets.store {
        builder = builder.store(store);
    }
    let coordinator = builder.build()?;

    let cancel_token = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            cancel_token.cancel();
        }
    });

    // the bus closes once the pipeline drops its sink
    let bus_listener = targets.bus.map(|bus| {
        let mut events = bus.subscribe();
        tokio::spawn(async move {
            let mut received = 0u64;
            loop {
                match events.recv().await {
                    Ok(_) => received += 1,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event bus listener fell behind, skipped {skipped} events")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            received
        })
    });

    let report = coordinator.run().await?;
    info!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(listener) = bus_listener {
        info!("Event bus delivered {} events", listener.await?);
    }
    Ok(())
}
