//! Mock Hardware Implementations
//!
//! Provides a simulated EAF motor for testing without physical hardware.
//! All operations are async-safe (tokio locks, no blocking sleeps).
//!
//! # Simulation model
//!
//! Motion advances only when the motor is polled: every `is_moving` call moves the
//! simulated shaft `steps_per_poll` steps towards its target. This keeps tests
//! deterministic regardless of the poll interval the controller uses.
//!
//! Failures are injected through [`MockFaults`], and every call is recorded as an
//! [`ActuatorCall`] so tests can check ordering.

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::hardware::capabilities::Actuator;

/// One recorded call into the mock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorCall {
    /// `connect` with the device index
    Connect(u32),
    /// `disconnect`
    Disconnect,
    /// `set_max_steps`
    SetMaxSteps(u32),
    /// `set_backlash`
    SetBacklash(u32),
    /// `set_reverse`
    SetReverse(bool),
    /// `set_beep`
    SetBeep(bool),
    /// `move_to` with the commanded step
    MoveTo(i32),
    /// `stop`
    Stop,
    /// `is_moving`
    IsMoving,
    /// `position`
    Position,
    /// `temperature`
    Temperature,
    /// `reset_position`
    ResetPosition(i32),
    /// `max_steps`
    MaxSteps,
    /// `step_range`
    StepRange,
    /// `backlash`
    Backlash,
    /// `reverse`
    Reverse,
    /// `beep`
    Beep,
}

/// Failures the mock should report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockFaults {
    /// `connect` fails
    pub connect: bool,
    /// `move_to` fails
    pub move_to: bool,
    /// `stop` fails
    pub stop: bool,
    /// `disconnect` fails
    pub disconnect: bool,
    /// The motor never reaches its target and never reports rest
    pub stuck: bool,
}

#[derive(Debug)]
struct MockState {
    connected: bool,
    position: i32,
    target: i32,
    moving: bool,
    max_steps: u32,
    backlash: u32,
    reverse: bool,
    beep: bool,
    temperature: f32,
    faults: MockFaults,
    calls: Vec<ActuatorCall>,
}

impl MockState {
    fn require_connected(&self) -> Result<()> {
        if !self.connected {
            bail!("MockActuator: not connected");
        }
        Ok(())
    }
}

/// Simulated EAF motor
///
/// # Example
///
/// ```rust,ignore
/// let eaf = MockActuator::new().with_steps_per_poll(100);
/// eaf.connect(0).await?;
/// eaf.move_to(250).await?;
/// while eaf.is_moving().await? {}
/// assert_eq!(eaf.position().await?, 250);
/// ```
#[derive(Debug)]
pub struct MockActuator {
    state: Mutex<MockState>,
    steps_per_poll: u32,
}

impl MockActuator {
    /// Motor at step 0 that completes any move on the first poll
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                connected: false,
                position: 0,
                target: 0,
                moving: false,
                max_steps: 60_000,
                backlash: 0,
                reverse: false,
                beep: false,
                temperature: 21.5,
                faults: MockFaults::default(),
                calls: Vec::new(),
            }),
            steps_per_poll: u32::MAX,
        }
    }

    /// Start at the given step
    pub fn with_position(mut self, position: i32) -> Self {
        let state = self.state.get_mut();
        state.position = position;
        state.target = position;
        self
    }

    /// Travel at most `steps` per poll
    pub fn with_steps_per_poll(mut self, steps: u32) -> Self {
        self.steps_per_poll = steps.max(1);
        self
    }

    /// Report the given temperature
    pub fn with_temperature(mut self, celsius: f32) -> Self {
        self.state.get_mut().temperature = celsius;
        self
    }

    /// Inject failures from the start
    pub fn with_faults(mut self, faults: MockFaults) -> Self {
        self.state.get_mut().faults = faults;
        self
    }

    /// Replace the injected failures
    pub async fn set_faults(&self, faults: MockFaults) {
        self.state.lock().await.faults = faults;
    }

    /// All calls so far, oldest first
    pub async fn calls(&self) -> Vec<ActuatorCall> {
        self.state.lock().await.calls.clone()
    }

    /// Forget recorded calls
    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Number of recorded calls matching `call`
    pub async fn count(&self, call: ActuatorCall) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| **c == call)
            .count()
    }

    /// Whether the device is open
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Target of the last accepted move
    pub async fn target(&self) -> i32 {
        self.state.lock().await.target
    }

    /// Set the motor in motion towards `target` behind the controller's back,
    /// the way the hand controller would.
    pub async fn start_external_move(&self, target: i32) {
        let mut state = self.state.lock().await;
        state.target = target;
        state.moving = state.position != target || state.faults.stuck;
    }
}

impl Default for MockActuator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Actuator for MockActuator {
    async fn connect(&self, device_index: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::Connect(device_index));
        if state.faults.connect {
            bail!("MockActuator: no EAF at index {}", device_index);
        }
        state.connected = true;
        debug!(device_index, "MockActuator: connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::Disconnect);
        if state.faults.disconnect {
            bail!("MockActuator: close failed");
        }
        state.connected = false;
        state.moving = false;
        debug!("MockActuator: disconnected");
        Ok(())
    }

    async fn set_max_steps(&self, steps: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::SetMaxSteps(steps));
        state.require_connected()?;
        state.max_steps = steps;
        Ok(())
    }

    async fn set_backlash(&self, steps: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::SetBacklash(steps));
        state.require_connected()?;
        state.backlash = steps;
        Ok(())
    }

    async fn set_reverse(&self, reverse: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::SetReverse(reverse));
        state.require_connected()?;
        state.reverse = reverse;
        Ok(())
    }

    async fn set_beep(&self, beep: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::SetBeep(beep));
        state.require_connected()?;
        state.beep = beep;
        Ok(())
    }

    async fn move_to(&self, step: i32) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::MoveTo(step));
        state.require_connected()?;
        if state.faults.move_to {
            bail!("MockActuator: move to {} rejected", step);
        }
        if state.moving {
            bail!("MockActuator: motor is already moving");
        }

        let max = i32::try_from(state.max_steps).unwrap_or(i32::MAX);
        state.target = step.clamp(0, max);
        state.moving = state.target != state.position || state.faults.stuck;
        debug!(from = state.position, to = state.target, "MockActuator: moving");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::Stop);
        state.require_connected()?;
        if state.faults.stop {
            bail!("MockActuator: stop rejected");
        }
        state.moving = false;
        state.target = state.position;
        Ok(())
    }

    async fn is_moving(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::IsMoving);
        state.require_connected()?;

        if state.moving && !state.faults.stuck {
            let remaining = i64::from(state.target) - i64::from(state.position);
            let stride = remaining.abs().min(i64::from(self.steps_per_poll));
            let advanced = i64::from(state.position) + stride * remaining.signum();
            state.position = i32::try_from(advanced)?;
            state.moving = state.position != state.target;
        }

        Ok(state.moving)
    }

    async fn position(&self) -> Result<i32> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::Position);
        state.require_connected()?;
        Ok(state.position)
    }

    async fn temperature(&self) -> Result<f32> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::Temperature);
        state.require_connected()?;
        Ok(state.temperature)
    }

    async fn reset_position(&self, step: i32) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::ResetPosition(step));
        state.require_connected()?;
        state.position = step;
        state.target = step;
        Ok(())
    }

    async fn max_steps(&self) -> Result<u32> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::MaxSteps);
        state.require_connected()?;
        Ok(state.max_steps)
    }

    async fn step_range(&self) -> Result<u32> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::StepRange);
        state.require_connected()?;
        if state.moving {
            bail!("MockActuator: step range unavailable while moving");
        }
        Ok(state.max_steps)
    }

    async fn backlash(&self) -> Result<u32> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::Backlash);
        state.require_connected()?;
        Ok(state.backlash)
    }

    async fn reverse(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::Reverse);
        state.require_connected()?;
        Ok(state.reverse)
    }

    async fn beep(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.calls.push(ActuatorCall::Beep);
        state.require_connected()?;
        Ok(state.beep)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_connection() {
        let eaf = MockActuator::new();
        assert!(eaf.position().await.is_err());
        assert!(eaf.move_to(10).await.is_err());

        eaf.connect(0).await.unwrap();
        assert_eq!(eaf.position().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_motion_advances_per_poll() {
        let eaf = MockActuator::new().with_steps_per_poll(100);
        eaf.connect(0).await.unwrap();

        eaf.move_to(250).await.unwrap();
        assert!(eaf.is_moving().await.unwrap());
        assert_eq!(eaf.position().await.unwrap(), 100);
        assert!(eaf.is_moving().await.unwrap());
        assert_eq!(eaf.position().await.unwrap(), 200);
        assert!(!eaf.is_moving().await.unwrap());
        assert_eq!(eaf.position().await.unwrap(), 250);
    }

    #[tokio::test]
    async fn test_motion_backwards() {
        let eaf = MockActuator::new()
            .with_position(500)
            .with_steps_per_poll(300);
        eaf.connect(0).await.unwrap();

        eaf.move_to(100).await.unwrap();
        assert!(eaf.is_moving().await.unwrap());
        assert_eq!(eaf.position().await.unwrap(), 200);
        assert!(!eaf.is_moving().await.unwrap());
        assert_eq!(eaf.position().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_move_clamped_to_travel() {
        let eaf = MockActuator::new();
        eaf.connect(0).await.unwrap();
        eaf.set_max_steps(1_000).await.unwrap();

        eaf.move_to(5_000).await.unwrap();
        assert!(!eaf.is_moving().await.unwrap());
        assert_eq!(eaf.position().await.unwrap(), 1_000);

        eaf.move_to(-20).await.unwrap();
        assert!(!eaf.is_moving().await.unwrap());
        assert_eq!(eaf.position().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_overlapping_move() {
        let eaf = MockActuator::new().with_steps_per_poll(1);
        eaf.connect(0).await.unwrap();

        eaf.move_to(100).await.unwrap();
        assert!(eaf.move_to(50).await.is_err());

        eaf.stop().await.unwrap();
        assert!(!eaf.is_moving().await.unwrap());
        eaf.move_to(50).await.unwrap();
    }

    #[tokio::test]
    async fn test_stuck_motor_never_settles() {
        let eaf = MockActuator::new().with_faults(MockFaults {
            stuck: true,
            ..Default::default()
        });
        eaf.connect(0).await.unwrap();
        eaf.move_to(10).await.unwrap();

        for _ in 0..5 {
            assert!(eaf.is_moving().await.unwrap());
        }
        assert_eq!(eaf.position().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let eaf = MockActuator::new().with_faults(MockFaults {
            connect: true,
            ..Default::default()
        });
        assert!(eaf.connect(0).await.is_err());
        assert!(!eaf.is_connected().await);

        eaf.set_faults(MockFaults {
            stop: true,
            disconnect: true,
            ..Default::default()
        })
        .await;
        eaf.connect(0).await.unwrap();
        assert!(eaf.stop().await.is_err());
        assert!(eaf.disconnect().await.is_err());
        assert!(eaf.is_connected().await);
    }

    #[tokio::test]
    async fn test_records_calls() {
        let eaf = MockActuator::new();
        eaf.connect(2).await.unwrap();
        eaf.set_beep(true).await.unwrap();
        eaf.reset_position(42).await.unwrap();
        eaf.disconnect().await.unwrap();

        assert_eq!(
            eaf.calls().await,
            vec![
                ActuatorCall::Connect(2),
                ActuatorCall::SetBeep(true),
                ActuatorCall::ResetPosition(42),
                ActuatorCall::Disconnect,
            ]
        );
        assert_eq!(eaf.count(ActuatorCall::Disconnect).await, 1);
    }

    #[tokio::test]
    async fn test_external_move() {
        let eaf = MockActuator::new().with_steps_per_poll(10);
        eaf.connect(0).await.unwrap();

        eaf.start_external_move(30).await;
        assert_eq!(eaf.target().await, 30);
        assert!(eaf.step_range().await.is_err());
        while eaf.is_moving().await.unwrap() {}
        assert_eq!(eaf.position().await.unwrap(), 30);
        assert_eq!(eaf.step_range().await.unwrap(), 60_000);
    }
}
