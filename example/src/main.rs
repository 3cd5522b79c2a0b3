use ur_driver::control::RobotReceiveTimeout;
use ur_driver::drivers::PlaceholderTemplate;
use ur_driver::{DriverConfig, DriverError, UrDriver, Vector6d};

use tracing_subscriber::EnvFilter;

// Minimal stand-in for the control program; the real one ships with the
// robot-side package.
const PROGRAM: &str = "\
{{TOOL_COMM_SETUP}}
def external_control():
  socket_open(\"{{REVERSE_IP}}\", {{REVERSE_PORT}}, \"reverse_socket\")
  socket_open(\"{{REVERSE_IP}}\", {{TRAJECTORY_PORT}}, \"trajectory_socket\")
  socket_open(\"{{REVERSE_IP}}\", {{SCRIPT_COMMAND_PORT}}, \"script_command_socket\")
  MULT_jointstate = {{JOINT_STATE_MULT}}
  set_payload({{PAYLOAD_MASS}}, {{PAYLOAD_COG}})
end
";

const CYCLES: usize = 500;

#[tokio::main]
async fn main() -> Result<(), DriverError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Either a robot address or a JSON configuration file.
    let config = match std::env::args().nth(1) {
        Some(arg) if arg.ends_with(".json") => DriverConfig::from_json(&std::fs::read_to_string(arg)?)?,
        Some(ip) => DriverConfig::new(ip),
        None => DriverConfig::default(),
    };

    println!("going to connect to {}", config.robot_ip);
    let driver = UrDriver::new(config, PlaceholderTemplate::new(PROGRAM)).await?;
    println!(
        "connected: controller {}, {} Hz, recipe {:?}",
        driver.version(),
        driver.control_frequency(),
        driver.rtde_output_recipe()
    );

    driver.register_program_state_callback(|running| {
        println!("robot program {}", if running { "connected" } else { "disconnected" });
    });

    driver.start_rtde_communication().await?;
    for cycle in 0..CYCLES {
        let Some(package) = driver.get_data_package().await else {
            println!("no data package in cycle {}", cycle);
            continue;
        };
        if cycle % 125 == 0 {
            let timestamp: Option<f64> = package.get_data("timestamp");
            let q: Option<Vector6d> = package.get_data("actual_q");
            println!("t={:?} q={:?}", timestamp, q);
        }
        // Fails quietly until the robot program is running.
        driver.write_keepalive(RobotReceiveTimeout::default()).await;
    }

    driver.shutdown().await;
    Ok(())
}
