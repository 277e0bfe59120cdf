//! Focuser configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/focuser.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `EAF_FOCUSER_`, using `__` between levels
//!    (e.g. `EAF_FOCUSER_FOCUSER__ACTUATOR__DEVICE_INDEX=1`)
//!
//! Every field has a default, so an empty file yields the stock EAF setup.
//!
//! # Example
//! ```no_run
//! use eaf_focuser::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Focuser device: {}", config.focuser.actuator.device_index);
//! # Ok::<(), eaf_focuser::error::FocuserError>(())
//! ```

use crate::error::{FocuserError, FocuserResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Millimetres of travel per motor step for the EAF on the 8" Monti telescope.
pub const DEFAULT_STEP_TO_MM: f64 = 0.002_421_052_63;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Focuser settings
    pub focuser: FocuserConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "EAF Focuser".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Everything the focus controller needs at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocuserConfig {
    /// Hardware settings applied once on connect
    pub actuator: ActuatorConfig,
    /// Calibration constant: millimetres per motor step
    pub step_to_mm: f64,
    /// Poll cadence and time ceiling for moves
    pub timing: MotionTiming,
}

impl Default for FocuserConfig {
    fn default() -> Self {
        Self {
            actuator: ActuatorConfig::default(),
            step_to_mm: DEFAULT_STEP_TO_MM,
            timing: MotionTiming::default(),
        }
    }
}

/// Actuator settings, applied once after the device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Index of the USB unit to address, zero unless several EAFs are attached
    pub device_index: u32,
    /// Upper bound on travel in steps
    pub max_steps: u32,
    /// Backlash compensation in steps
    pub backlash: u32,
    /// Reverse the rotation direction
    pub reverse: bool,
    /// Beep when a move starts
    pub sound: bool,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            max_steps: 60_000,
            backlash: 0,
            reverse: false,
            sound: true,
        }
    }
}

/// Timing of the move supervision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionTiming {
    /// Delay between two polls of the actuator (milliseconds)
    pub poll_interval_ms: u64,
    /// Maximum accumulated poll time before a move is declared stuck (milliseconds)
    pub time_limit_ms: u64,
}

impl Default for MotionTiming {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            time_limit_ms: 300_000,
        }
    }
}

impl MotionTiming {
    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Time ceiling as a `Duration`
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }
}

impl AppConfig {
    /// Load configuration from `config/focuser.toml` and environment variables
    pub fn load() -> FocuserResult<Self> {
        Self::load_from("config/focuser.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> FocuserResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("EAF_FOCUSER_").split("__"))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> FocuserResult<String> {
        toml::to_string_pretty(self).map_err(|e| FocuserError::Configuration(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> FocuserResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(FocuserError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.focuser.validate()
    }
}

impl FocuserConfig {
    /// Validate the focuser section on its own
    pub fn validate(&self) -> FocuserResult<()> {
        if self.actuator.max_steps == 0 {
            return Err(FocuserError::Configuration(
                "max_steps must be positive".to_string(),
            ));
        }

        if !(self.step_to_mm.is_finite() && self.step_to_mm > 0.0) {
            return Err(FocuserError::Configuration(format!(
                "Invalid step_to_mm {}. Must be a positive number",
                self.step_to_mm
            )));
        }

        if self.timing.poll_interval_ms == 0 {
            return Err(FocuserError::Configuration(
                "poll_interval_ms must be positive".to_string(),
            ));
        }

        if self.timing.time_limit() < self.timing.poll_interval() {
            return Err(FocuserError::Configuration(format!(
                "time_limit_ms ({}) is shorter than one poll interval ({}ms)",
                self.timing.time_limit_ms, self.timing.poll_interval_ms
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.focuser.actuator.max_steps, 60_000);
        assert_eq!(config.focuser.timing.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.focuser.timing.time_limit(), Duration::from_secs(300));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[focuser.actuator]
device_index = 1
backlash = 25

[focuser.timing]
poll_interval_ms = 250
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.name, "EAF Focuser");
        assert_eq!(config.focuser.actuator.device_index, 1);
        assert_eq!(config.focuser.actuator.backlash, 25);
        assert_eq!(config.focuser.actuator.max_steps, 60_000);
        assert!(config.focuser.actuator.sound);
        assert_eq!(config.focuser.timing.poll_interval_ms, 250);
        assert_eq!(config.focuser.timing.time_limit_ms, 300_000);
        assert_eq!(config.focuser.step_to_mm, DEFAULT_STEP_TO_MM);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.focuser, FocuserConfig::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[focuser.actuator]\nmax_steps = \"many\"").unwrap();

        let result = AppConfig::load_from(file.path());
        assert!(matches!(result, Err(FocuserError::Config(_))));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_focuser_values() {
        let mut config = FocuserConfig::default();
        config.actuator.max_steps = 0;
        assert!(config.validate().is_err());

        let mut config = FocuserConfig::default();
        config.step_to_mm = 0.0;
        assert!(config.validate().is_err());

        let mut config = FocuserConfig::default();
        config.timing.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = FocuserConfig::default();
        config.timing.poll_interval_ms = 5_000;
        config.timing.time_limit_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_of_effective_config() {
        let config = AppConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("max_steps = 60000"));
        assert!(rendered.contains("poll_interval_ms = 500"));
    }
}
