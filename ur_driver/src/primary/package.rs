//! Decoder for the subset of the status stream the driver consumes.
//!
//! The stream carries many package kinds; only the version message and the
//! kinematics info sub-package are decoded, everything else is skipped by
//! its length prefix.

use bytes::{Buf, BytesMut};

use super::VersionInformation;
use crate::{DriverError, Result, Vector6Uint32, Vector6d};

pub const ROBOT_STATE: u8 = 16;
pub const ROBOT_MESSAGE: u8 = 20;
pub const KINEMATICS_INFO: u8 = 5;
pub const VERSION_MESSAGE: u8 = 3;

/// Robot state sub-package length of kinematics info, header included.
pub const KINEMATICS_INFO_LEN: usize = 5 + 6 * 4 + 4 * 6 * 8 + 4;

const HEADER_LEN: usize = 5;
const MAX_PACKAGE_LEN: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq)]
pub struct VersionMessage {
    pub project_name: String,
    pub version: VersionInformation,
    pub build_date: String,
}

/// Denavit-Hartenberg parameters as calibrated on the robot.
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicsInfo {
    pub checksum: Vector6Uint32,
    pub dh_theta: Vector6d,
    pub dh_a: Vector6d,
    pub dh_d: Vector6d,
    pub dh_alpha: Vector6d,
    pub calibration_status: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryPackage {
    Version(VersionMessage),
    Kinematics(KinematicsInfo),
}

/// Splits every complete package off `buf` and returns the decoded ones.
pub fn decode_packages(buf: &mut BytesMut) -> Result<Vec<PrimaryPackage>> {
    let mut decoded = Vec::new();
    while buf.len() >= HEADER_LEN {
        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let len = usize::try_from(len)
            .ok()
            .filter(|len| (HEADER_LEN..=MAX_PACKAGE_LEN).contains(len))
            .ok_or_else(|| DriverError::Protocol(format!("status package length {len}")))?;
        if buf.len() < len {
            break;
        }
        let mut package = buf.split_to(len);
        package.advance(4);
        match package.get_u8() {
            ROBOT_MESSAGE => decoded.extend(decode_robot_message(&package)?),
            ROBOT_STATE => decoded.extend(decode_robot_state(&package)?),
            _ => {}
        }
    }
    Ok(decoded)
}

fn decode_robot_message(mut body: &[u8]) -> Result<Option<PrimaryPackage>> {
    // timestamp, source, message type
    if body.len() < 10 {
        return Err(DriverError::Protocol("truncated robot message".to_string()));
    }
    body.advance(9);
    if body.get_u8() != VERSION_MESSAGE {
        return Ok(None);
    }

    let truncated = || DriverError::Protocol("truncated version message".to_string());
    let name_len = usize::try_from(body.first().copied().ok_or_else(truncated)? as i8).map_err(|_| truncated())?;
    body.advance(1);
    if body.len() < name_len + 10 {
        return Err(truncated());
    }
    let project_name = String::from_utf8_lossy(&body[..name_len]).to_string();
    body.advance(name_len);
    let major = body.get_u8() as u32;
    let minor = body.get_u8() as u32;
    let bugfix = body.get_i32().max(0) as u32;
    let build = body.get_i32().max(0) as u32;
    let build_date = String::from_utf8_lossy(body).trim_end_matches('\0').to_string();

    Ok(Some(PrimaryPackage::Version(VersionMessage {
        project_name,
        version: VersionInformation {
            major,
            minor,
            bugfix,
            build,
        },
        build_date,
    })))
}

fn decode_robot_state(mut body: &[u8]) -> Result<Vec<PrimaryPackage>> {
    let mut decoded = Vec::new();
    while body.len() >= HEADER_LEN {
        let len = usize::try_from(i32::from_be_bytes([body[0], body[1], body[2], body[3]]))
            .ok()
            .filter(|len| *len >= HEADER_LEN && *len <= body.len())
            .ok_or_else(|| DriverError::Protocol("robot state sub-package overruns its package".to_string()))?;
        let sub = &body[..len];
        if sub[4] == KINEMATICS_INFO {
            if len < KINEMATICS_INFO_LEN {
                return Err(DriverError::Protocol(format!("kinematics info of {len} bytes")));
            }
            decoded.push(PrimaryPackage::Kinematics(decode_kinematics(&sub[HEADER_LEN..])));
        }
        body.advance(len);
    }
    Ok(decoded)
}

fn decode_kinematics(mut body: &[u8]) -> KinematicsInfo {
    let checksum = std::array::from_fn(|_| body.get_u32());
    let mut vector = || -> Vector6d { std::array::from_fn(|_| body.get_f64()) };
    let dh_theta = vector();
    let dh_a = vector();
    let dh_d = vector();
    let dh_alpha = vector();
    KinematicsInfo {
        checksum,
        dh_theta,
        dh_a,
        dh_d,
        dh_alpha,
        calibration_status: body.get_u32(),
    }
}
