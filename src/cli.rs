use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "watertwin",
    version,
    about = "Water-distribution digital-twin monitoring core (demo runner)"
)]
pub struct Args {
    /// EPANET `.inp` network file to load. Requires the `epanet-engine`
    /// feature; when omitted (or the feature is disabled) a small synthetic
    /// network is simulated in memory instead.
    #[arg(long)]
    pub inp_path: Option<PathBuf>,

    /// Postgres connection string. When omitted the demo runs entirely
    /// against the in-memory `Store` double.
    #[arg(long)]
    pub database_url: Option<String>,

    /// Simulator generation interval, in minutes.
    #[arg(long, default_value_t = 5.0)]
    pub sim_interval_minutes: f64,

    /// Monitor check interval, in minutes.
    #[arg(long, default_value_t = 5.0)]
    pub mon_interval_minutes: f64,

    /// How long to let the demo run before stopping and printing final
    /// status, in seconds. `0` means run until Ctrl-C.
    #[arg(long, default_value_t = 30)]
    pub run_seconds: u64,
}
