//! Focuser Hardware
//!
//! - `capabilities`: trait seams (actuator, focuser, module lifecycle)
//! - `focuser`: the focus controller state machine
//! - `mock`: simulated EAF for tests and hardware-free runs
//! - `eaf_sdk`: vendor SDK driver (feature `eaf_sdk`)

pub mod capabilities;
pub mod focuser;
pub mod mock;

#[cfg(feature = "eaf_sdk")]
pub mod eaf_sdk;

pub use capabilities::{Actuator, Focuser, Module, MotionStatus};
pub use focuser::{mm_to_steps, steps_to_mm, FocusController, PositionUpdate};
pub use mock::{ActuatorCall, MockActuator, MockFaults};

#[cfg(feature = "eaf_sdk")]
pub use eaf_sdk::EafDriver;
