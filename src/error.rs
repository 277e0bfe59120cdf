//! Custom error types for the focuser.
//!
//! This module defines the primary error type, `FocuserError`, for the whole crate.
//! Using the `thiserror` crate, it provides a consistent way to report every failure
//! the focus controller can surface, from configuration problems to a wedged motor.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: Opening the actuator failed. Fatal to the session; nothing else
//!   may be attempted until a new connect succeeds.
//! - **`Move`**: The actuator rejected a move command. The controller has already forced
//!   a disconnect when this is returned.
//! - **`MotionTimeout`**: A move was still in progress when the time ceiling passed. The
//!   controller has already forced a disconnect.
//! - **`Stop`**: The actuator rejected a stop command. The controller has already forced
//!   a disconnect.
//! - **`NotReady`** / **`Busy`** / **`Cancelled`**: Contract violations and aborts that
//!   leave the connection intact.
//! - **`InvalidTarget`**: A focus destination that is not finite or has no step
//!   position. Rejected before anything is sent to the device.
//! - **`Actuator`**: Any other failure reported by the driver while supervising motion.
//! - **`Config`** / **`Configuration`**: Parse and semantic configuration errors.
//!
//! Disconnect failures never appear here: they are logged and the session is considered
//! over either way.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type FocuserResult<T> = std::result::Result<T, FocuserError>;

/// Errors surfaced by the focus controller and its configuration layer.
#[derive(Error, Debug)]
pub enum FocuserError {
    #[error("Focuser failed to connect to device {device_index}: {source}")]
    Connection {
        device_index: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("Focuser rejected move to step {step}; device was disconnected")]
    Move {
        step: i32,
        #[source]
        source: anyhow::Error,
    },

    #[error("Focuser still moving after {elapsed:?}; device was disconnected")]
    MotionTimeout { elapsed: Duration },

    #[error("Focuser did not stop; device was disconnected")]
    Stop(#[source] anyhow::Error),

    #[error("Focuser is not connected")]
    NotReady,

    #[error("Focuser is busy with another move")]
    Busy,

    #[error("Focuser move was cancelled")]
    Cancelled,

    #[error("Focus target {mm}mm is not a reachable step position")]
    InvalidTarget { mm: f64 },

    #[error("Actuator error: {0}")]
    Actuator(#[source] anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl FocuserError {
    /// Whether the controller tore down the connection before returning this error.
    ///
    /// Callers must reconnect before issuing further commands when this is true.
    pub fn disconnected(&self) -> bool {
        matches!(
            self,
            FocuserError::Move { .. }
                | FocuserError::MotionTimeout { .. }
                | FocuserError::Stop(_)
                | FocuserError::Actuator(_)
        )
    }
}

impl From<figment::Error> for FocuserError {
    fn from(value: figment::Error) -> Self {
        FocuserError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_reports_disconnect() {
        let err = FocuserError::MotionTimeout {
            elapsed: Duration::from_secs(300),
        };
        assert!(err.disconnected());
        assert!(err.to_string().contains("300s"));
    }

    #[test]
    fn contract_errors_keep_connection() {
        assert!(!FocuserError::NotReady.disconnected());
        assert!(!FocuserError::Busy.disconnected());
        assert!(!FocuserError::Cancelled.disconnected());
        assert!(!FocuserError::InvalidTarget { mm: f64::NAN }.disconnected());
    }

    #[test]
    fn move_error_carries_step_and_source() {
        let err = FocuserError::Move {
            step: 413,
            source: anyhow::anyhow!("EAFMove returned 5"),
        };
        assert!(err.to_string().contains("413"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("EAFMove returned 5"));
    }
}
