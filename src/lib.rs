//! # EAF Focuser Library
//!
//! Control of a ZWO EAF electronic focuser for an observatory control framework.
//! The library converts millimetre focus requests into motor steps, drives the
//! motor through a pluggable actuator and supervises each move until it settles,
//! times out or is aborted.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based configuration (TOML file plus `EAF_FOCUSER_` environment).
//! - **`error`**: The `FocuserError` enum shared by the whole crate.
//! - **`hardware`**: Capability traits, the `FocusController` state machine, the mock
//!   actuator and (with the `eaf_sdk` feature) the vendor SDK driver.
//! - **`logging`**: `tracing-subscriber` setup for the CLI and embedding applications.

pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;

pub use error::{FocuserError, FocuserResult};
pub use hardware::{Actuator, FocusController, Focuser, Module, MotionStatus};
