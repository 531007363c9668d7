//! Entry point: load `blinksim.toml`, play the configured scenario, print
//! the final device snapshots as JSON.

use anyhow::Context;
use blinksim_app::driver;
use blinksim_app::event_bus::InProcessEventBus;
use blinksim_app::simulation::Simulation;
use blinksimd::config::Config;
use blinksimd::runner::{self, Outcome};
use blinksimd::scenario::Scenario;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter).context("invalid log filter")?)
        .init();

    let scenario = Scenario::load(&config.scenario.path)
        .with_context(|| format!("failed to load scenario {}", config.scenario.path.display()))?;

    // Event bus
    let event_bus = InProcessEventBus::new(config.runtime.event_log_capacity);
    let logger = tokio::spawn(log_records(event_bus.subscribe()));

    // Simulation
    let simulation = Simulation::new(config.runtime);
    let (handle, task) = driver::spawn(simulation, event_bus, 64);

    let report = runner::play(&handle, &scenario, interrupted()).await;
    handle.shutdown().await;
    task.await.context("simulation task panicked")?;
    logger.await.context("record logger panicked")?;

    let report = report.context("scenario run failed")?;
    if report.outcome == Outcome::Interrupted {
        tracing::info!("interrupted, reporting current state");
    }
    println!("{}", serde_json::to_string_pretty(&report.devices)?);
    Ok(())
}

/// Resolves on Ctrl-C. A failure to install the handler means the run can
/// only end with the scenario.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Log every published record until the bus closes.
async fn log_records(mut receiver: broadcast::Receiver<blinksim_domain::event::DeviceRecord>) {
    loop {
        match receiver.recv().await {
            Ok(record) => tracing::info!(device = %record.device, at = %record.at, "{}", record.event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "record logger lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
