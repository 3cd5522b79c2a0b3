//! Robot configuration for the simulated Universal Robots arms.
//!
//! DH parameters are the nominal values published per model. A real robot
//! reports its factory-calibrated values, which differ slightly; the
//! simulator reports exactly what is configured here so a test can predict
//! the calibration checksum.

use std::f64::consts::FRAC_PI_2;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RobotModel {
    Ur3e,
    Ur5e,
    Ur10e,
    /// CB3 generation, software 3.x.
    Ur5,
}

/// Controller software version reported by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareVersion {
    pub major: u8,
    pub minor: u8,
    pub bugfix: u32,
    pub build: u32,
}

/// Robot configuration with DH parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    pub model: RobotModel,
    pub version: SoftwareVersion,

    /// Maximum payload in kg
    pub max_payload: f64,

    // Standard DH, meters and radians
    pub dh_theta: [f64; 6],
    pub dh_a: [f64; 6],
    pub dh_d: [f64; 6],
    pub dh_alpha: [f64; 6],

    pub calibration_status: u32,

    /// Joint positions reported until the robot program moves the arm.
    pub initial_q: [f64; 6],
}

const E_SERIES: SoftwareVersion = SoftwareVersion {
    major: 5,
    minor: 9,
    bugfix: 4,
    build: 1031232,
};

const CB3: SoftwareVersion = SoftwareVersion {
    major: 3,
    minor: 15,
    bugfix: 8,
    build: 106339,
};

const ALPHA: [f64; 6] = [FRAC_PI_2, 0.0, 0.0, FRAC_PI_2, -FRAC_PI_2, 0.0];
const HOME: [f64; 6] = [0.0, -FRAC_PI_2, FRAC_PI_2, -FRAC_PI_2, -FRAC_PI_2, 0.0];

impl RobotConfig {
    pub fn ur3e() -> Self {
        Self {
            model: RobotModel::Ur3e,
            version: E_SERIES,
            max_payload: 3.0,
            dh_theta: [0.0; 6],
            dh_a: [0.0, -0.24355, -0.2132, 0.0, 0.0, 0.0],
            dh_d: [0.15185, 0.0, 0.0, 0.13105, 0.08535, 0.0921],
            dh_alpha: ALPHA,
            calibration_status: 1,
            initial_q: HOME,
        }
    }

    pub fn ur5e() -> Self {
        Self {
            model: RobotModel::Ur5e,
            version: E_SERIES,
            max_payload: 5.0,
            dh_theta: [0.0; 6],
            dh_a: [0.0, -0.425, -0.3922, 0.0, 0.0, 0.0],
            dh_d: [0.1625, 0.0, 0.0, 0.1333, 0.0997, 0.0996],
            dh_alpha: ALPHA,
            calibration_status: 1,
            initial_q: HOME,
        }
    }

    pub fn ur10e() -> Self {
        Self {
            model: RobotModel::Ur10e,
            version: E_SERIES,
            max_payload: 12.5,
            dh_theta: [0.0; 6],
            dh_a: [0.0, -0.6127, -0.57155, 0.0, 0.0, 0.0],
            dh_d: [0.1807, 0.0, 0.0, 0.17415, 0.11985, 0.11655],
            dh_alpha: ALPHA,
            calibration_status: 1,
            initial_q: HOME,
        }
    }

    pub fn ur5() -> Self {
        Self {
            model: RobotModel::Ur5,
            version: CB3,
            max_payload: 5.0,
            dh_theta: [0.0; 6],
            dh_a: [0.0, -0.425, -0.39225, 0.0, 0.0, 0.0],
            dh_d: [0.089159, 0.0, 0.0, 0.10915, 0.09465, 0.0823],
            dh_alpha: ALPHA,
            calibration_status: 1,
            initial_q: HOME,
        }
    }

    /// Create configuration for a specific robot model
    pub fn from_model(model: RobotModel) -> Self {
        match model {
            RobotModel::Ur3e => Self::ur3e(),
            RobotModel::Ur5e => Self::ur5e(),
            RobotModel::Ur10e => Self::ur10e(),
            RobotModel::Ur5 => Self::ur5(),
        }
    }

    /// Default cyclic exchange frequency of the controller generation.
    pub fn default_frequency(&self) -> f64 {
        if self.version.major >= 5 {
            500.0
        } else {
            125.0
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self::ur5e()
    }
}
