use anyhow::Result;
use gas_pipeline_twin::simulation::{JsonLinesSink, NullSink, SimulationContext, Simulator, TelemetrySink};
use gas_pipeline_twin::{config::Config, domain::NetworkTopology, telemetry};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::load()?;
    telemetry::init_tracing(&cfg.telemetry);

    if cfg.simulation.random_seed.is_none() {
        warn!("no random_seed configured, run will not be reproducible");
    }

    let topology = NetworkTopology::load_or_fallback(cfg.simulation.topology_path.as_deref());
    let started = chrono::Utc::now();
    let context = match SimulationContext::new(topology, &cfg, started) {
        Ok(context) => context,
        Err(e) => {
            warn!(error = %e, "topology failed to initialize, using built-in minimal network");
            SimulationContext::new(NetworkTopology::minimal(), &cfg, started)?
        }
    };

    let sink: Arc<dyn TelemetrySink> = match &cfg.telemetry.records_path {
        Some(path) => {
            let sink = JsonLinesSink::open(path).await?;
            info!(path = %sink.path().display(), "persisting tick records");
            Arc::new(sink)
        }
        None => Arc::new(NullSink),
    };

    info!(
        nodes = context.topology().nodes.len(),
        pipes = context.topology().pipes.len(),
        "starting gas pipeline twin"
    );

    let simulator = Simulator::new(context, sink, &cfg.simulation);
    simulator.start();

    telemetry::shutdown_signal().await;

    simulator.stop().await;
    let status = simulator.status();
    info!(
        ticks = status.tick,
        plant_level = %status.plant_status.level,
        "shutdown complete"
    );
    Ok(())
}
