mod common;

use std::time::Duration;

use sim::{request_program, RobotConfig, SimConfig};
use ur_driver::control::ToolVoltage;
use ur_driver::drivers::{ToolCommSetup, ToolParity};
use ur_driver::primary::{KinematicsInfo, VersionInformation};
use ur_driver::{DriverError, UrDriver};

use common::*;

fn expected_checksum(robot: &RobotConfig) -> String {
    KinematicsInfo {
        checksum: [0; 6],
        dh_theta: robot.dh_theta,
        dh_a: robot.dh_a,
        dh_d: robot.dh_d,
        dh_alpha: robot.dh_alpha,
        calibration_status: robot.calibration_status,
    }
    .to_hash()
}

#[tokio::test]
async fn test_version_and_calibration() {
    let sim = start_sim().await;
    let mut config = driver_config(&sim);
    config.calibration_checksum = Some("calib_0000000000000000".to_string());
    // a mismatch is reported, not fatal
    let driver = start_driver(config).await;

    assert_eq!(
        driver.version(),
        VersionInformation {
            major: 5,
            minor: 9,
            bugfix: 4,
            build: 1031232,
        }
    );
    assert_eq!(driver.control_frequency(), 125.0);

    let checksum = expected_checksum(&RobotConfig::default());
    assert!(checksum.starts_with("calib_"));
    assert!(driver.check_calibration(&checksum));
    assert!(!driver.check_calibration("calib_0000000000000000"));
    assert!(!driver.check_calibration(&expected_checksum(&RobotConfig::ur10e())));

    driver.shutdown().await;
}

#[tokio::test]
async fn test_data_packages_after_start() {
    let sim = start_sim().await;
    let driver = start_driver(driver_config(&sim)).await;
    assert_eq!(driver.rtde_output_recipe(), vec!["timestamp", "actual_q"]);

    driver.start_rtde_communication().await.unwrap();
    let first = driver.get_data_package().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = driver.get_data_package().await.unwrap();
    assert!(second.get_data::<f64>("timestamp") > first.get_data::<f64>("timestamp"));

    driver.pause_rtde_communication().await.unwrap();
    driver.shutdown().await;
    assert!(driver.get_data_package().await.is_none());
}

#[tokio::test]
async fn test_program_is_served_on_request() {
    let sim = start_sim().await;
    let driver = start_driver(driver_config(&sim)).await;
    let ports = driver.hosted_ports();

    assert!(driver.send_robot_program().await);
    let program = request_program("127.0.0.1", ports.script_sender).await.unwrap();
    assert!(program.contains(&format!("reverse 127.0.0.1:{}", ports.reverse)));
    assert!(program.contains(&format!("trajectory {}", ports.trajectory)));
    assert!(program.contains(&format!("script_command {}", ports.script_command)));
    assert!(program.contains("servoj_gain 2000"));
    assert!(sim.scripts().await.is_empty());

    driver.shutdown().await;
}

#[tokio::test]
async fn test_headless_mode_pushes_the_program() {
    let sim = start_sim().await;
    let mut config = driver_config(&sim);
    config.headless_mode = true;
    let driver = start_driver(config).await;

    let sim_ref = &sim;
    wait_until("program on the status interface", || async move {
        !sim_ref.scripts().await.is_empty()
    })
    .await;
    let scripts = sim.scripts().await;
    assert!(scripts[0].contains(&format!("trajectory {}", driver.hosted_ports().trajectory)));

    assert!(driver.send_script("textmsg(\"hello\")").await);
    assert!(!driver.send_script("").await);
    wait_until("second script", || async move { sim_ref.scripts().await.len() == 2 }).await;
    assert_eq!(sim.scripts().await[1], "textmsg(\"hello\")\n");

    driver.shutdown().await;
}

#[tokio::test]
async fn test_cb3_controller() {
    let sim = start_sim_with(SimConfig {
        robot: RobotConfig::ur5(),
        ..SimConfig::default()
    })
    .await;
    let mut config = driver_config(&sim);
    config.target_frequency = None;
    let driver = start_driver(config).await;
    assert_eq!(driver.version().major, 3);
    assert!(!driver.version().is_e_series());
    assert_eq!(driver.control_frequency(), 125.0);
    driver.shutdown().await;
}

#[tokio::test]
async fn test_tool_communication_is_rendered_into_the_program() {
    let sim = start_sim().await;
    let mut config = driver_config(&sim);
    config.tool_comm_setup = Some(ToolCommSetup {
        tool_voltage: ToolVoltage::V24,
        baud_rate: 115200,
        parity: ToolParity::Even,
        ..ToolCommSetup::default()
    });
    let driver = start_driver(config).await;

    let program = request_program("127.0.0.1", driver.hosted_ports().script_sender)
        .await
        .unwrap();
    assert!(program.contains("set_tool_voltage(24)\nset_tool_communication(True, 115200, 2, 1, 1.5, 3.5)"));
    driver.shutdown().await;
}

#[tokio::test]
async fn test_tool_communication_needs_e_series() {
    let sim = start_sim_with(SimConfig {
        robot: RobotConfig::ur5(),
        ..SimConfig::default()
    })
    .await;
    let mut config = driver_config(&sim);
    config.target_frequency = None;
    config.tool_comm_setup = Some(ToolCommSetup::default());
    let result = UrDriver::new(config, ur_driver::drivers::PlaceholderTemplate::new(TEMPLATE)).await;
    assert!(matches!(result, Err(DriverError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_invalid_configuration_is_refused() {
    let sim = start_sim().await;
    let mut config = driver_config(&sim);
    config.output_recipe.clear();
    let result = UrDriver::new(config, ur_driver::drivers::PlaceholderTemplate::new(TEMPLATE)).await;
    assert!(matches!(result, Err(DriverError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_unreachable_robot_fails() {
    init_tracing();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = ur_driver::DriverConfig::new("127.0.0.1");
    config.rtde_port = port;
    config.reverse_port = 0;
    config.script_sender_port = 0;
    config.trajectory_port = 0;
    config.script_command_port = 0;
    let result = UrDriver::new(config, ur_driver::drivers::PlaceholderTemplate::new(TEMPLATE)).await;
    assert!(matches!(result, Err(DriverError::Transport(_))));
}
