mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sim::ProgramOptions;
use ur_driver::control::{ControlMode, FreedriveControlMessage, RobotReceiveTimeout};

use common::*;

#[tokio::test]
async fn test_program_state_follows_reverse_connection() {
    let sim = start_sim().await;
    let driver = start_driver(driver_config(&sim)).await;

    let running = Arc::new(AtomicBool::new(false));
    let changes = Arc::new(AtomicUsize::new(0));
    {
        let running = running.clone();
        let changes = changes.clone();
        driver.register_program_state_callback(move |state| {
            running.store(state, Ordering::SeqCst);
            changes.fetch_add(1, Ordering::SeqCst);
        });
    }

    // no robot program yet
    assert!(!driver.write_keepalive(RobotReceiveTimeout::default()).await);

    let program = start_program(&driver, &sim, ProgramOptions::default()).await;
    let running_ref = &running;
    wait_until("program to start", || async move { running_ref.load(Ordering::SeqCst) }).await;

    assert!(driver.stop_control().await);
    wait_until("program to stop", || async move { !running_ref.load(Ordering::SeqCst) }).await;
    assert!(program.log().await.stopped);
    assert_eq!(changes.load(Ordering::SeqCst), 2);

    driver.shutdown().await;
}

#[tokio::test]
async fn test_joint_commands_reach_the_robot() {
    let sim = start_sim().await;
    let driver = start_driver(driver_config(&sim)).await;
    let program = start_program(&driver, &sim, ProgramOptions::default()).await;

    let target = [0.1, -1.2, 1.3, -0.4, 0.5, -0.6];
    assert!(
        driver
            .write_joint_command(&target, ControlMode::Servoj, RobotReceiveTimeout::millisec(20))
            .await
    );
    assert!(driver.write_keepalive(RobotReceiveTimeout::off()).await);
    assert!(
        driver
            .write_freedrive_control_message(FreedriveControlMessage::Start, RobotReceiveTimeout::millisec(200))
            .await
    );

    let program_ref = &program;
    wait_until("three reverse frames", || async move {
        program_ref.log().await.reverse_frames.len() == 3
    })
    .await;
    let frames = program.log().await.reverse_frames;

    // 20 ms at a 125 Hz control rate rounds to 24 ms
    assert_eq!(frames[0][0], 24);
    assert_eq!(frames[0][1], 100_000);
    assert_eq!(frames[0][6], -600_000);
    assert_eq!(frames[0][7], 1);
    assert_eq!(frames[1], vec![0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(frames[2][0], 200);
    assert_eq!(frames[2][1], 1);
    assert_eq!(frames[2][7], 6);

    // the simulated arm follows servo targets
    let q = sim.state().lock().await.q;
    assert!((q[1] + 1.2).abs() < 1e-6);

    driver.shutdown().await;
}

#[tokio::test]
async fn test_realtime_modes_reject_unbounded_timeouts() {
    let sim = start_sim().await;
    let driver = start_driver(driver_config(&sim)).await;
    let program = start_program(&driver, &sim, ProgramOptions::default()).await;

    let q = [0.0; 6];
    assert!(
        !driver
            .write_joint_command(&q, ControlMode::Servoj, RobotReceiveTimeout::millisec(1001))
            .await
    );
    assert!(!driver.write_joint_command(&q, ControlMode::Speedj, RobotReceiveTimeout::off()).await);
    // not a joint command mode
    assert!(!driver.write_joint_command(&q, ControlMode::Forward, RobotReceiveTimeout::default()).await);
    assert!(
        driver
            .write_joint_command(&q, ControlMode::Speedj, RobotReceiveTimeout::sec(1.0))
            .await
    );

    let program_ref = &program;
    wait_until("one reverse frame", || async move {
        !program_ref.log().await.reverse_frames.is_empty()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let frames = program.log().await.reverse_frames;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0][0], 1000);
    assert_eq!(frames[0][7], 2);

    driver.shutdown().await;
}

#[tokio::test]
async fn test_unsendable_setpoints_never_reach_the_robot() {
    let sim = start_sim().await;
    let driver = start_driver(driver_config(&sim)).await;
    let program = start_program(&driver, &sim, ProgramOptions::default()).await;

    let timeout = RobotReceiveTimeout::millisec(8);
    let nan = [f64::NAN, 1.0, 0.0, 0.0, 0.0, 0.0];
    assert!(!driver.write_joint_command(&nan, ControlMode::Servoj, timeout).await);
    let too_far = [0.0, 1.0, 5000.0, 0.0, 0.0, 0.0];
    assert!(!driver.write_joint_command(&too_far, ControlMode::Servoj, timeout).await);
    assert!(driver.write_keepalive(timeout).await);

    let program_ref = &program;
    wait_until("keepalive", || async move {
        !program_ref.log().await.reverse_frames.is_empty()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let frames = program.log().await.reverse_frames;
    assert_eq!(frames, vec![vec![8, 0, 0, 0, 0, 0, 0, 0]]);

    driver.shutdown().await;
}
