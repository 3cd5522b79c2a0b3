// Library exports for the simulated UR controller

pub mod primary;
pub mod program;
pub mod robot_config;
pub mod rtde;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use program::{request_program, ExternalControlProgram, ProgramLog, ProgramOptions, ProgramPorts};
pub use robot_config::{RobotConfig, RobotModel, SoftwareVersion};
pub use rtde::RtdeOptions;

/// State shared by every simulated interface.
#[derive(Debug, Clone, Default)]
pub struct SimState {
    pub q: [f64; 6],
    /// Decoded input packages, in arrival order.
    pub inputs: Vec<HashMap<String, f64>>,
    /// Script programs received on the status interface.
    pub scripts: Vec<String>,
    /// Stops output packages while set.
    pub stalled: bool,
    /// Timestamp of the most recent output package.
    pub last_timestamp: Option<f64>,
}

pub type SharedState = Arc<Mutex<SimState>>;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub robot: RobotConfig,
    pub bind_ip: String,
    /// 0 picks an ephemeral port.
    pub rtde_port: u16,
    pub primary_port: u16,
    pub rtde: RtdeOptions,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            robot: RobotConfig::default(),
            bind_ip: "127.0.0.1".to_string(),
            rtde_port: 0,
            primary_port: 0,
            rtde: RtdeOptions::default(),
        }
    }
}

pub struct Simulator {
    rtde_port: u16,
    primary_port: u16,
    state: SharedState,
    token: CancellationToken,
}

impl Simulator {
    pub async fn start(config: SimConfig) -> io::Result<Self> {
        let rtde = TcpListener::bind((config.bind_ip.as_str(), config.rtde_port)).await?;
        let primary = TcpListener::bind((config.bind_ip.as_str(), config.primary_port)).await?;
        let rtde_port = rtde.local_addr()?.port();
        let primary_port = primary.local_addr()?.port();

        let state = Arc::new(Mutex::new(SimState {
            q: config.robot.initial_q,
            ..SimState::default()
        }));
        let token = CancellationToken::new();

        tokio::spawn(rtde::serve(
            rtde,
            config.robot.clone(),
            config.rtde,
            state.clone(),
            token.child_token(),
        ));
        tokio::spawn(primary::serve(primary, config.robot.clone(), state.clone(), token.child_token()));

        info!(
            "simulated {:?} listening: cyclic exchange on {}, status on {}",
            config.robot.model, rtde_port, primary_port
        );
        Ok(Self {
            rtde_port,
            primary_port,
            state,
            token,
        })
    }

    pub fn rtde_port(&self) -> u16 {
        self.rtde_port
    }

    pub fn primary_port(&self) -> u16 {
        self.primary_port
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub async fn set_stalled(&self, stalled: bool) {
        self.state.lock().await.stalled = stalled;
    }

    pub async fn scripts(&self) -> Vec<String> {
        self.state.lock().await.scripts.clone()
    }

    pub async fn inputs(&self) -> Vec<HashMap<String, f64>> {
        self.state.lock().await.inputs.clone()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
