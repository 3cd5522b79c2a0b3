use std::time::Duration;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use super::package::{KinematicsInfo, PrimaryPackage, VersionMessage};
use super::{PrimaryStream, VersionInformation};
use crate::{DriverError, Result};

impl KinematicsInfo {
    /// Checksum token of the calibrated kinematics, as written into the
    /// calibration file shipped with a robot description.
    pub fn to_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for joint in 0..6 {
            hasher.update(self.dh_theta[joint].to_be_bytes());
            hasher.update(self.dh_d[joint].to_be_bytes());
            hasher.update(self.dh_a[joint].to_be_bytes());
            hasher.update(self.dh_alpha[joint].to_be_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        format!("calib_{}", &digest[..16])
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    version: Option<VersionMessage>,
    kinematics: Option<KinematicsInfo>,
}

/// Keeps the first version message and kinematics info seen on the status
/// stream and answers version and calibration queries from them.
#[derive(Debug, Default)]
pub struct StatusValidator {
    snapshot: RwLock<Snapshot>,
}

impl StatusValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `package` unless a value of its kind is already known.
    pub fn consume(&self, package: PrimaryPackage) {
        let mut snapshot = self.snapshot.write();
        match package {
            PrimaryPackage::Version(message) if snapshot.version.is_none() => {
                info!("robot software {} ({})", message.version, message.project_name);
                snapshot.version = Some(message);
            }
            PrimaryPackage::Kinematics(info) if snapshot.kinematics.is_none() => {
                snapshot.kinematics = Some(info);
            }
            _ => {}
        }
    }

    pub fn is_complete(&self) -> bool {
        let snapshot = self.snapshot.read();
        snapshot.version.is_some() && snapshot.kinematics.is_some()
    }

    /// Reads the status stream at `addr` until both the version and the
    /// kinematics are known or `wait` runs out.
    pub async fn collect(&self, addr: &str, wait: Duration) -> Result<()> {
        let deadline = Instant::now() + wait;
        let mut stream = PrimaryStream::connect(addr).await?;
        while !self.is_complete() {
            let packages = timeout_at(deadline, stream.read_packages())
                .await
                .map_err(|_| DriverError::Timeout(format!("status stream incomplete after {wait:?}")))??;
            for package in packages {
                self.consume(package);
            }
        }
        Ok(())
    }

    pub fn read_version(&self) -> Option<VersionInformation> {
        self.snapshot.read().version.as_ref().map(|m| m.version)
    }

    pub fn calibration_checksum(&self) -> Option<String> {
        self.snapshot.read().kinematics.as_ref().map(KinematicsInfo::to_hash)
    }

    /// Compares the robot's kinematics checksum with `expected`. Returns
    /// false when they differ or nothing has been received yet.
    pub fn check_calibration(&self, expected: &str) -> bool {
        match self.calibration_checksum() {
            None => {
                warn!("calibration not verified: no kinematics received from the robot yet");
                false
            }
            Some(actual) if actual == expected => {
                info!("calibration checksum {} verified", actual);
                true
            }
            Some(actual) => {
                error!(
                    "calibration mismatch: robot reports {}, expected {}. \
                     Kinematics-dependent results will be inaccurate",
                    actual, expected
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinematics(theta0: f64) -> KinematicsInfo {
        KinematicsInfo {
            checksum: [0; 6],
            dh_theta: [theta0, 0.0, 0.0, 0.0, 0.0, 0.0],
            dh_a: [0.0, -0.425, -0.3922, 0.0, 0.0, 0.0],
            dh_d: [0.1625, 0.0, 0.0, 0.1333, 0.0997, 0.0996],
            dh_alpha: [std::f64::consts::FRAC_PI_2, 0.0, 0.0, std::f64::consts::FRAC_PI_2, -std::f64::consts::FRAC_PI_2, 0.0],
            calibration_status: 0,
        }
    }

    #[test]
    fn test_hash_format_and_sensitivity() {
        let hash = kinematics(0.0).to_hash();
        assert!(hash.starts_with("calib_"));
        assert_eq!(hash.len(), "calib_".len() + 16);
        assert_ne!(hash, kinematics(1e-6).to_hash());
    }

    #[test]
    fn test_check_calibration() {
        let validator = StatusValidator::new();
        assert!(!validator.check_calibration("calib_0000000000000000"));

        validator.consume(PrimaryPackage::Kinematics(kinematics(0.0)));
        let actual = kinematics(0.0).to_hash();
        assert!(validator.check_calibration(&actual));
        assert!(!validator.check_calibration("calib_0000000000000000"));
    }

    #[test]
    fn test_first_value_wins() {
        let validator = StatusValidator::new();
        validator.consume(PrimaryPackage::Kinematics(kinematics(0.0)));
        validator.consume(PrimaryPackage::Kinematics(kinematics(0.5)));
        assert_eq!(validator.calibration_checksum(), Some(kinematics(0.0).to_hash()));
        assert!(!validator.is_complete());
        assert_eq!(validator.read_version(), None);
    }
}
