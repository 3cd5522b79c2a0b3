use std::error::Error;

use sim::{RobotConfig, SimConfig, Simulator};
use tracing::info;
use tracing_subscriber::EnvFilter;

const RTDE_PORT: u16 = 30004;
const PRIMARY_PORT: u16 = 30001;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Optional path to a JSON robot configuration
    let robot = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str::<RobotConfig>(&std::fs::read_to_string(path)?)?,
        None => RobotConfig::default(),
    };

    let sim = Simulator::start(SimConfig {
        robot,
        bind_ip: "0.0.0.0".to_string(),
        rtde_port: RTDE_PORT,
        primary_port: PRIMARY_PORT,
        ..SimConfig::default()
    })
    .await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down simulator");
    sim.shutdown();
    Ok(())
}
