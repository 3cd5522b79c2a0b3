use std::io;
use thiserror::Error;

/// Result alias used throughout the driver.
pub type Result<T, E = DriverError> = std::result::Result<T, E>;

/// Errors raised by the driver's channels.
///
/// Public `write_*` calls never return these directly: they log the error
/// and report `false`. Construction and the cyclic channel's `poll` do
/// surface them.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Socket refused, dropped, or a write failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// No robot-side client is attached to a driver-hosted socket.
    #[error("no client connected to the {0} socket")]
    NotConnected(&'static str),

    /// Recipe negotiation failure or malformed frame. Fatal to the session.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The cyclic channel stopped delivering frames.
    #[error("connection to robot lost: {0}")]
    ConnectionLost(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller misuse, rejected before any socket I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DriverError {
    /// Whether the error ends the affected channel's session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Protocol(_) | DriverError::ConnectionLost(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::DriverError;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::NotConnected("reverse");
        assert_eq!(err.to_string(), "no client connected to the reverse socket");

        let err = DriverError::Protocol("field foo not found".to_string());
        assert!(err.to_string().contains("foo"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: DriverError = io_err.into();
        assert!(matches!(err, DriverError::Io(_)));
        assert!(!err.is_fatal());
    }
}
