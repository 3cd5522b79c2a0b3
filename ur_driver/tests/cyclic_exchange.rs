mod common;

use std::time::Duration;

use sim::{RtdeOptions, SimConfig};
use tokio_util::sync::CancellationToken;
use ur_driver::rtde::{RtdeClient, RtdeSettings, SessionState};
use ur_driver::{DriverError, Vector6d};

use common::*;

fn settings(outputs: &[&str]) -> RtdeSettings {
    RtdeSettings {
        output_recipe: outputs.iter().map(|s| s.to_string()).collect(),
        target_frequency: Some(125.0),
        ..RtdeSettings::default()
    }
}

fn addr(port: u16) -> String {
    format!("127.0.0.1:{}", port)
}

#[tokio::test]
async fn test_timestamps_increase_across_polls() {
    let sim = start_sim().await;
    let token = CancellationToken::new();
    let client = RtdeClient::connect(&addr(sim.rtde_port()), &settings(&["timestamp", "actual_q"]), &token)
        .await
        .unwrap();
    assert_eq!(client.protocol_version(), 2);
    assert_eq!(client.frequency(), 125.0);
    assert_eq!(client.period(), Duration::from_millis(8));
    assert_eq!(client.output_recipe().names(), vec!["timestamp", "actual_q"]);

    // nothing flows before start
    assert!(client.poll(Duration::from_millis(50)).await.unwrap().is_none());

    client.start().await.unwrap();
    assert_eq!(client.state(), SessionState::Started);

    let mut last = -1.0;
    for _ in 0..3 {
        let package = client.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        let timestamp: f64 = package.get_data("timestamp").unwrap();
        assert!(timestamp > last, "{} after {}", timestamp, last);
        last = timestamp;
        let q: Vector6d = package.get_data("actual_q").unwrap();
        assert_eq!(q, sim::RobotConfig::default().initial_q);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    client.pause().await.unwrap();
    assert_eq!(client.state(), SessionState::Paused);
    client.close().await;
    assert!(client.poll(Duration::ZERO).await.is_err());
}

#[tokio::test]
async fn test_poll_hands_out_the_newest_frame() {
    let sim = start_sim().await;
    let token = CancellationToken::new();
    let client = RtdeClient::connect(&addr(sim.rtde_port()), &settings(&["timestamp"]), &token)
        .await
        .unwrap();
    client.start().await.unwrap();

    // let a backlog of frames build up, then freeze the stream
    tokio::time::sleep(Duration::from_millis(80)).await;
    sim.set_stalled(true).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let newest = sim.state().lock().await.last_timestamp.unwrap();
    // ten periods have passed, a queue would still be at the start
    assert!(newest > 0.05, "{}", newest);
    let package = client.poll(Duration::ZERO).await.unwrap().unwrap();
    let timestamp: f64 = package.get_data("timestamp").unwrap();
    assert_eq!(timestamp, newest);

    // older frames were superseded, not queued
    assert!(client.poll(Duration::ZERO).await.unwrap().is_none());
    client.close().await;
}

#[tokio::test]
async fn test_unknown_output_field_is_refused() {
    let sim = start_sim().await;
    let token = CancellationToken::new();
    let result = RtdeClient::connect(&addr(sim.rtde_port()), &settings(&["timestamp", "no_such_field"]), &token).await;
    match result {
        Err(DriverError::Protocol(msg)) => assert!(msg.contains("no_such_field"), "{}", msg),
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("recipe with an unknown field was accepted"),
    }
}

#[tokio::test]
async fn test_claimed_input_is_refused() {
    let sim = start_sim_with(SimConfig {
        rtde: RtdeOptions {
            claimed_inputs: vec!["speed_slider_mask".to_string()],
            ..RtdeOptions::default()
        },
        ..SimConfig::default()
    })
    .await;
    let token = CancellationToken::new();
    let mut settings = settings(&["timestamp"]);
    settings.input_recipe = vec!["speed_slider_mask".to_string(), "speed_slider_fraction".to_string()];
    let result = RtdeClient::connect(&addr(sim.rtde_port()), &settings, &token).await;
    assert!(matches!(result, Err(DriverError::Protocol(msg)) if msg.contains("speed_slider_mask")));
}

#[tokio::test]
async fn test_stalled_stream_loses_connection() {
    let sim = start_sim().await;
    let token = CancellationToken::new();
    let mut settings = settings(&["timestamp"]);
    settings.connection_lost_periods = 10;
    let client = RtdeClient::connect(&addr(sim.rtde_port()), &settings, &token).await.unwrap();
    client.start().await.unwrap();
    assert!(client.poll(Duration::from_millis(100)).await.unwrap().is_some());

    sim.set_stalled(true).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(matches!(client.state(), SessionState::ConnectionLost(_)));
    assert!(matches!(
        client.poll(Duration::from_millis(10)).await,
        Err(DriverError::ConnectionLost(_))
    ));
}

#[tokio::test]
async fn test_falls_back_to_protocol_version_one() {
    let sim = start_sim_with(SimConfig {
        rtde: RtdeOptions {
            accepted_versions: vec![1],
            ..RtdeOptions::default()
        },
        ..SimConfig::default()
    })
    .await;
    let token = CancellationToken::new();
    let client = RtdeClient::connect(&addr(sim.rtde_port()), &settings(&["timestamp"]), &token)
        .await
        .unwrap();
    assert_eq!(client.protocol_version(), 1);
    assert_eq!(client.output_recipe().id, None);

    client.start().await.unwrap();
    let package = client.poll(Duration::from_millis(100)).await.unwrap().unwrap();
    assert!(package.get_data::<f64>("timestamp").is_some());
}

#[tokio::test]
async fn test_controller_version_picks_default_frequency() {
    let sim = start_sim_with(SimConfig {
        robot: sim::RobotConfig::ur5(),
        ..SimConfig::default()
    })
    .await;
    let token = CancellationToken::new();
    let settings = RtdeSettings::default();
    let client = RtdeClient::connect(&addr(sim.rtde_port()), &settings, &token).await.unwrap();
    assert_eq!(client.version().major, 3);
    assert_eq!(client.frequency(), 125.0);
}

#[tokio::test]
async fn test_writer_sends_inputs() {
    let sim = start_sim().await;
    let mut config = driver_config(&sim);
    config.input_recipe = [
        "speed_slider_mask",
        "speed_slider_fraction",
        "standard_digital_output_mask",
        "standard_digital_output",
        "input_int_register_24",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let driver = start_driver(config).await;
    let writer = driver.rtde_writer();

    assert!(writer.send_speed_slider(0.5).await);
    assert!(!writer.send_speed_slider(1.5).await);
    assert!(writer.send_standard_digital_output(3, true).await);
    assert!(!writer.send_standard_digital_output(8, true).await);
    assert!(writer.send_input_int_register(24, -7).await);
    // not part of the input recipe
    assert!(!writer.send_tool_digital_output(0, true).await);
    assert!(!writer.send_input_int_register(12, 1).await);

    let sim = &sim;
    wait_until("three input packages", || async move { sim.inputs().await.len() == 3 }).await;
    let inputs = sim.inputs().await;
    assert_eq!(inputs[0]["speed_slider_mask"], 1.0);
    assert_eq!(inputs[0]["speed_slider_fraction"], 0.5);
    assert_eq!(inputs[1]["speed_slider_mask"], 0.0);
    assert_eq!(inputs[1]["standard_digital_output_mask"], 8.0);
    assert_eq!(inputs[1]["standard_digital_output"], 8.0);
    assert_eq!(inputs[2]["standard_digital_output_mask"], 0.0);
    assert_eq!(inputs[2]["input_int_register_24"], -7.0);

    driver.shutdown().await;
}
