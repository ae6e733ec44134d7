pub mod aggregator;
pub mod baseline_registry;
pub mod monitor;
pub mod simulator;
