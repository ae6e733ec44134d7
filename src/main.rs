use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::sleep;
use uuid::Uuid;
use watertwin_core::cli;
use watertwin_core::db;
use watertwin_core::domain::{ItemKind, Network, NetworkItem, SensorKind};
use watertwin_core::hydraulic::{self, HydraulicEngine, MemoryEngine};
use watertwin_core::random::SystemRandom;
use watertwin_core::registry::Registry;
use watertwin_core::services::monitor::MonConfig;
use watertwin_core::services::simulator::SimConfig;
use watertwin_core::store::memory::MemoryStore;
use watertwin_core::store::postgres::PgStore;
use watertwin_core::store::Store;
use watertwin_core::time::SystemClock;

/// Builds a small synthetic three-item network (one junction, one pipe, one
/// tank) and a matching in-memory hydraulic engine, for runs where no
/// `.inp` file was given.
fn demo_network(network_id: Uuid) -> (Vec<NetworkItem>, Box<dyn HydraulicEngine>) {
    let items = vec![
        NetworkItem {
            network_id,
            item_id: "J-1".into(),
            kind: ItemKind::Junction,
        },
        NetworkItem {
            network_id,
            item_id: "P-1".into(),
            kind: ItemKind::Pipe,
        },
        NetworkItem {
            network_id,
            item_id: "T-1".into(),
            kind: ItemKind::Tank,
        },
    ];
    let engine = MemoryEngine::new()
        .with_item("J-1", ItemKind::Junction)
        .with_item("P-1", ItemKind::Pipe)
        .with_tank("T-1")
        .with_value("J-1", SensorKind::Pressure, 50.0)
        .with_value("P-1", SensorKind::Flow, 12.0)
        .with_value("T-1", SensorKind::Pressure, 8.0)
        .with_value("T-1", SensorKind::Level, 8.0);
    (items, Box::new(engine))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let network_id = Uuid::new_v4();
    let inp_path = args
        .inp_path
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "demo.inp".to_string());

    let store: Arc<dyn Store> = match &args.database_url {
        Some(url) => {
            let pool = db::connect_lazy(url)?;
            Arc::new(PgStore::new(pool))
        }
        None => Arc::new(MemoryStore::new()),
    };

    store
        .upsert_network(&Network {
            id: network_id,
            name: "demo".into(),
            inp_path: inp_path.clone(),
            baseline_computed_at: None,
        })
        .await
        .context("failed to create demo network")?;

    let (_, demo_engine) = demo_network(network_id);

    let registry = Registry::new(store.clone(), Arc::new(SystemClock), Arc::new(SystemRandom));

    tracing::info!(%network_id, "computing baseline");
    let baseline_engine: Box<dyn HydraulicEngine> = if args.inp_path.is_some() {
        hydraulic::load_default_engine(&inp_path)?
    } else {
        let (_, engine) = demo_network(network_id);
        engine
    };
    registry
        .baseline_registry()
        .compute_baseline(network_id, baseline_engine, false)
        .await
        .context("failed to compute baseline")?;

    let sim_config = SimConfig {
        generation_interval: Duration::from_secs_f64(args.sim_interval_minutes * 60.0),
        ..SimConfig::default()
    };
    registry.start_simulator(network_id, sim_config).await?;

    let mon_config = MonConfig {
        check_interval: Duration::from_secs_f64(args.mon_interval_minutes * 60.0),
        ..MonConfig::default()
    };
    let monitor_engine: Box<dyn HydraulicEngine> = if args.inp_path.is_some() {
        hydraulic::load_default_engine(&inp_path)?
    } else {
        demo_engine
    };
    registry.start_monitor(network_id, mon_config, monitor_engine).await?;

    tracing::info!("simulator and monitor running");
    if args.run_seconds == 0 {
        tokio::signal::ctrl_c().await.context("failed to wait for ctrl-c")?;
    } else {
        sleep(Duration::from_secs(args.run_seconds)).await;
    }

    let metrics = registry.dashboard_metrics(network_id, 60.0).await?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    registry.stop_simulator().await.ok();
    registry.stop_monitor().await.ok();
    Ok(())
}
