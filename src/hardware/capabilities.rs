//! Hardware Capabilities
//!
//! Trait seams between the focus controller, the driver underneath it and the
//! observatory framework above it:
//!
//! - [`Actuator`]: raw motor primitives exposed by the EAF driver (steps, not millimetres)
//! - [`Focuser`]: the framework-facing focus interface (millimetres, offsets, status)
//! - [`Module`]: lifecycle hooks the framework calls when a module is opened or closed
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Takes `&self`; implementations use interior mutability for state
//!
//! # Example
//!
//! ```rust,ignore
//! async fn park_at_zero<A: Actuator>(eaf: &A) -> anyhow::Result<()> {
//!     if eaf.is_moving().await? {
//!         eaf.stop().await?;
//!     }
//!     eaf.move_to(0).await
//! }
//! ```

use crate::error::FocuserResult;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Capability: Raw Focuser Motor
///
/// The opaque native driver boundary. Every method reports failure through `Err`;
/// the focus controller decides what a failure means for the session.
///
/// # Contract
/// - `connect` must succeed before any other call
/// - Positions are absolute motor steps
/// - `move_to` initiates motion and returns before it completes
/// - After `disconnect`, no further calls are made until the next `connect`
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Open the USB unit with the given index
    async fn connect(&self, device_index: u32) -> Result<()>;

    /// Close the device
    async fn disconnect(&self) -> Result<()>;

    /// Set the upper travel bound in steps
    async fn set_max_steps(&self, steps: u32) -> Result<()>;

    /// Set backlash compensation in steps
    async fn set_backlash(&self, steps: u32) -> Result<()>;

    /// Reverse (or restore) the rotation direction
    async fn set_reverse(&self, reverse: bool) -> Result<()>;

    /// Enable or disable the beep on move
    async fn set_beep(&self, beep: bool) -> Result<()>;

    /// Start an absolute move to `step`
    async fn move_to(&self, step: i32) -> Result<()>;

    /// Halt any motion in progress
    async fn stop(&self) -> Result<()>;

    /// Whether the motor is currently moving
    async fn is_moving(&self) -> Result<bool>;

    /// Current position in steps
    async fn position(&self) -> Result<i32>;

    /// Motor temperature in degrees Celsius
    async fn temperature(&self) -> Result<f32>;

    /// Redefine the current position as `step` without moving
    async fn reset_position(&self, step: i32) -> Result<()>;

    /// Configured upper travel bound
    async fn max_steps(&self) -> Result<u32>;

    /// Usable travel range reported by the device
    async fn step_range(&self) -> Result<u32>;

    /// Configured backlash compensation
    async fn backlash(&self) -> Result<u32>;

    /// Whether rotation is reversed
    async fn reverse(&self) -> Result<bool>;

    /// Whether the beep on move is enabled
    async fn beep(&self) -> Result<bool>;
}

/// Motion state reported to the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionStatus {
    /// Not connected yet (or no longer)
    Initializing,
    /// Connected and at rest
    Idle,
    /// Connected and moving
    Slewing,
}

impl fmt::Display for MotionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MotionStatus::Initializing => "initializing",
            MotionStatus::Idle => "idle",
            MotionStatus::Slewing => "slewing",
        };
        f.write_str(s)
    }
}

/// Capability: Focus Control
///
/// Framework-facing interface. Positions are millimetres; the reported focus is
/// always offset-compensated.
#[async_trait]
pub trait Focuser: Send + Sync {
    /// Move to an absolute focus, clearing any offset
    async fn set_focus(&self, focus_mm: f64) -> FocuserResult<()>;

    /// Apply `offset_mm` on top of the last absolute focus
    async fn set_focus_offset(&self, offset_mm: f64) -> FocuserResult<()>;

    /// Current focus minus the active offset
    async fn focus(&self) -> FocuserResult<f64>;

    /// Active offset
    async fn focus_offset(&self) -> f64;

    /// Current motion status
    async fn motion_status(&self) -> FocuserResult<MotionStatus>;

    /// Halt motion
    async fn stop_motion(&self) -> FocuserResult<()>;

    /// Whether the focuser is connected and usable
    async fn is_ready(&self) -> bool;

    /// Initialize the device. The EAF needs no homing, so the default does nothing.
    async fn init(&self) -> FocuserResult<()> {
        Ok(())
    }

    /// Park the device. The EAF has no park position, so the default does nothing.
    async fn park(&self) -> FocuserResult<()> {
        Ok(())
    }
}

/// Module lifecycle hooks called by the hosting framework.
#[async_trait]
pub trait Module: Send + Sync {
    /// Called once when the module starts
    async fn open(&self) -> FocuserResult<()>;

    /// Called once when the module shuts down
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_status_display() {
        assert_eq!(MotionStatus::Initializing.to_string(), "initializing");
        assert_eq!(MotionStatus::Idle.to_string(), "idle");
        assert_eq!(MotionStatus::Slewing.to_string(), "slewing");
    }
}
