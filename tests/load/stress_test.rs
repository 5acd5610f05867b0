//! Load Testing Suite for the pipeline twin
//!
//! Verifies that the tick loop keeps pace while operators hammer the
//! command surface:
//! - Concurrent commands and alarm acknowledgements
//! - Snapshot subscribers that fall behind
//! - Raw tick throughput without the scheduler

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use gas_pipeline_twin::config::Config;
use gas_pipeline_twin::domain::{NetworkTopology, Value};
use gas_pipeline_twin::simulation::{NullSink, SimulationContext, Simulator};

fn build_simulator(tick_millis: u64) -> Arc<Simulator> {
    let mut cfg = Config::default();
    cfg.simulation.tick_millis = tick_millis;
    cfg.simulation.random_seed = Some(2024);
    cfg.simulation.broadcast_every_ticks = 1;
    let ctx = SimulationContext::new(NetworkTopology::reference(), &cfg, chrono::Utc::now())
        .expect("reference network builds");
    Arc::new(Simulator::new(ctx, Arc::new(NullSink), &cfg.simulation))
}

/// Test: tick loop keeps running under 50 concurrent operator clients
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Ignore by default as this is a slow test
async fn test_tick_loop_under_command_load() {
    let sim = build_simulator(10);
    sim.start();

    let mut clients = JoinSet::new();
    for i in 0..50 {
        let sim = Arc::clone(&sim);
        clients.spawn(async move {
            let mut command = BTreeMap::new();
            command.insert("MANUAL_SETPOINT".to_string(), Value::Number(40.0 + (i % 10) as f64));
            for _ in 0..20 {
                assert!(sim.send_command("PLC_PRESSURE_CONTROL_Source_1", &command).success);
                let _ = sim.status();
                let _ = sim.acknowledge_alarm("PLC_SAFETY_MONITORING_Junction_2", "ALARM_CONDITION");
                tokio::time::sleep(Duration::from_millis(5 + (i % 7) as u64)).await;
            }
        });
    }
    while let Some(joined) = clients.join_next().await {
        joined.unwrap();
    }

    let ticks = sim.status().tick;
    sim.stop().await;
    println!("ticks completed under load: {}", ticks);
    assert!(ticks > 10, "tick loop starved: {} ticks", ticks);
}

/// Test: a subscriber that never reads does not stall the loop
#[tokio::test]
#[ignore] // Ignore by default as this is a slow test
async fn test_lagging_subscriber_does_not_block() {
    let sim = build_simulator(2);
    let _idle = sim.subscribe();
    let mut reader = sim.subscribe();
    sim.start();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let after = sim.status().tick;
    sim.stop().await;

    assert!(after > 50, "loop stalled at {} ticks", after);
    // The reader lagged but still receives the newest snapshots
    let mut received = 0;
    while let Ok(result) = tokio::time::timeout(Duration::from_millis(10), reader.recv()).await {
        if result.is_ok() {
            received += 1;
        }
    }
    assert!(received > 0);
}

/// Test: raw tick throughput
///
/// Measures how many full ticks (sensors, physics, scans, supervisory) run
/// per second without the interval scheduler.
#[test]
#[ignore] // Ignore by default as this is a slow test
fn test_tick_throughput_benchmark() {
    let mut cfg = Config::default();
    cfg.simulation.random_seed = Some(1);
    let mut ctx = SimulationContext::new(NetworkTopology::reference(), &cfg, chrono::Utc::now())
        .expect("reference network builds");

    let start = Instant::now();
    let mut ticks = 0u64;
    while start.elapsed() < Duration::from_secs(3) {
        ctx.tick();
        ticks += 1;
    }

    let per_second = ticks as f64 / start.elapsed().as_secs_f64();
    println!("Throughput: {:.0} ticks/second ({} ticks)", per_second, ticks);

    // Real time needs 10 ticks/s; leave a wide margin
    assert!(per_second > 1000.0, "Throughput too low: {:.0} ticks/s", per_second);
}
