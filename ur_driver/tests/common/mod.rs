#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use sim::{ExternalControlProgram, ProgramOptions, ProgramPorts, SimConfig, Simulator};
use tracing_subscriber::EnvFilter;
use ur_driver::drivers::PlaceholderTemplate;
use ur_driver::{DriverConfig, UrDriver};

pub const TEMPLATE: &str = "\
# control program
reverse {{REVERSE_IP}}:{{REVERSE_PORT}}
trajectory {{TRAJECTORY_PORT}}
script_command {{SCRIPT_COMMAND_PORT}}
servoj_gain {{SERVO_J_GAIN}}
{{TOOL_COMM_SETUP}}
";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Polls `check` every 10 ms and panics after five seconds.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn start_sim() -> Simulator {
    start_sim_with(SimConfig::default()).await
}

pub async fn start_sim_with(config: SimConfig) -> Simulator {
    init_tracing();
    Simulator::start(config).await.unwrap()
}

/// Driver configuration pointing at `sim`, every hosted socket ephemeral.
pub fn driver_config(sim: &Simulator) -> DriverConfig {
    let mut config = DriverConfig::new("127.0.0.1");
    config.rtde_port = sim.rtde_port();
    config.primary_port = sim.primary_port();
    config.reverse_port = 0;
    config.script_sender_port = 0;
    config.trajectory_port = 0;
    config.script_command_port = 0;
    config.reverse_ip = Some("127.0.0.1".to_string());
    config.target_frequency = Some(125.0);
    config.status_read_timeout_ms = 2000;
    config.script_command_reconnect_interval_ms = 50;
    config
}

pub async fn start_driver(config: DriverConfig) -> UrDriver {
    UrDriver::new(config, PlaceholderTemplate::new(TEMPLATE)).await.unwrap()
}

/// Runs the robot side of the control program against `driver`.
pub async fn start_program(driver: &UrDriver, sim: &Simulator, options: ProgramOptions) -> ExternalControlProgram {
    let ports = driver.hosted_ports();
    let program = ExternalControlProgram::connect(
        "127.0.0.1",
        ProgramPorts {
            reverse: ports.reverse,
            trajectory: ports.trajectory,
            script_command: ports.script_command,
        },
        options,
        sim.state(),
    )
    .await
    .unwrap();
    wait_until("robot program", || async move {
        driver.robot_program_connected() && driver.script_command_connected()
    })
    .await;
    program
}
