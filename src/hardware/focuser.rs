//! Focus Controller
//!
//! Turns millimetre focus requests into EAF step commands and supervises the
//! resulting motion.
//!
//! ## Move sequence
//!
//! 1. Convert the destination to steps, truncating toward zero; refuse values with
//!    no step position (`InvalidTarget`)
//! 2. Refuse when not connected (`NotReady`) or when another move is running (`Busy`)
//! 3. Stop the motor if it is already moving (best effort)
//! 4. Command the move; a rejected command forces a disconnect
//! 5. Poll `is_moving` and the position every poll interval, publishing each
//!    sample, until the motor rests, the time ceiling passes (forced disconnect)
//!    or the move is aborted. A disconnect from elsewhere ends the move without
//!    further device calls
//!
//! Only the raw step count is stored. Millimetres are always derived from it, so
//! `position_mm == raw_steps * step_to_mm` holds whenever it is read.
//!
//! ## Example
//!
//! ```rust,ignore
//! let eaf = Arc::new(MockActuator::new());
//! let focuser = FocusController::new(eaf, FocuserConfig::default());
//! focuser.connect().await?;
//! focuser.move_to(1.0).await?;
//! focuser.set_offset(0.05).await?;
//! println!("focus: {:.3}mm", focuser.focus().await);
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::FocuserConfig;
use crate::error::{FocuserError, FocuserResult};
use crate::hardware::capabilities::{Actuator, Focuser, Module, MotionStatus};

/// Relative distance from an integer below which a step quotient is float noise.
const STEP_SNAP_TOLERANCE: f64 = 1e-9;

/// Convert a raw step count to millimetres.
pub fn steps_to_mm(steps: i32, step_to_mm: f64) -> f64 {
    f64::from(steps) * step_to_mm
}

/// Convert millimetres to a step count, truncating toward zero.
///
/// Quotients within a relative 1e-9 of an integer snap to that integer, so a
/// value computed as `steps * step_to_mm` always converts back to `steps`.
/// Out-of-range values saturate at the `i32` bounds.
pub fn mm_to_steps(mm: f64, step_to_mm: f64) -> i32 {
    let exact = mm / step_to_mm;
    let nearest = exact.round();
    let steps = if (exact - nearest).abs() <= STEP_SNAP_TOLERANCE * nearest.abs().max(1.0) {
        nearest
    } else {
        exact.trunc()
    };
    steps as i32
}

/// One sample taken while supervising a move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    /// Position in motor steps as reported by the device
    pub raw_steps: i32,
    /// The same position in millimetres
    pub position_mm: f64,
    /// Whether the motor was still moving when sampled
    pub moving: bool,
}

#[derive(Debug, Default)]
struct FocuserState {
    connected: bool,
    /// Whether the "ready" message has been logged for the current connection
    ready_logged: bool,
    raw_position: i32,
    target_mm: f64,
    offset_mm: f64,
}

impl FocuserState {
    fn check_ready(&mut self) -> bool {
        if self.connected {
            if !self.ready_logged {
                info!("EAF is connected and ready");
                self.ready_logged = true;
            }
            true
        } else {
            if self.ready_logged {
                info!("EAF is not connected and not ready");
                self.ready_logged = false;
            }
            false
        }
    }
}

/// Drives one EAF through an [`Actuator`].
///
/// Exactly one controller may own a given device. Moves are serialized by
/// rejection: a move requested while another is being supervised fails with
/// [`FocuserError::Busy`].
pub struct FocusController<A: Actuator> {
    actuator: Arc<A>,
    config: FocuserConfig,
    state: Mutex<FocuserState>,
    move_lock: Mutex<()>,
    cancel: Mutex<CancellationToken>,
    updates: broadcast::Sender<PositionUpdate>,
}

impl<A: Actuator> FocusController<A> {
    /// Create a disconnected controller. Nothing is sent to the device until `connect`.
    pub fn new(actuator: Arc<A>, config: FocuserConfig) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            actuator,
            config,
            state: Mutex::new(FocuserState::default()),
            move_lock: Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
            updates,
        }
    }

    /// Configuration the controller was built with
    pub fn config(&self) -> &FocuserConfig {
        &self.config
    }

    /// Underlying driver
    pub fn actuator(&self) -> &Arc<A> {
        &self.actuator
    }

    /// Receive a [`PositionUpdate`] for every poll of every move
    pub fn subscribe(&self) -> broadcast::Receiver<PositionUpdate> {
        self.updates.subscribe()
    }

    /// Convert millimetres to steps with this device's calibration
    pub fn mm_to_steps(&self, mm: f64) -> i32 {
        mm_to_steps(mm, self.config.step_to_mm)
    }

    /// Step count for `mm`, refusing values that are not finite or do not fit a step position.
    pub fn checked_steps(&self, mm: f64) -> FocuserResult<i32> {
        let exact = (mm / self.config.step_to_mm).trunc();
        if !exact.is_finite() || exact < f64::from(i32::MIN) || exact > f64::from(i32::MAX) {
            return Err(FocuserError::InvalidTarget { mm });
        }
        Ok(self.mm_to_steps(mm))
    }

    /// Convert steps to millimetres with this device's calibration
    pub fn steps_to_mm(&self, steps: i32) -> f64 {
        steps_to_mm(steps, self.config.step_to_mm)
    }

    /// Open the device, apply the actuator settings and sample the initial position.
    ///
    /// Does nothing when already connected.
    pub async fn connect(&self) -> FocuserResult<()> {
        let settings = self.config.actuator;
        let device_index = settings.device_index;

        if self.state.lock().await.connected {
            debug!(device_index, "EAF already connected");
            return Ok(());
        }

        info!(device_index, "Opening EAF focusing device");
        self.actuator
            .connect(device_index)
            .await
            .map_err(|source| FocuserError::Connection {
                device_index,
                source,
            })?;

        let raw_position = match self.configure_and_sample().await {
            Ok(raw) => raw,
            Err(source) => {
                error!(device_index, error = %source, "EAF setup failed after open; closing");
                if let Err(e) = self.actuator.disconnect().await {
                    error!(error = %e, "Did not disconnect properly");
                }
                return Err(FocuserError::Connection {
                    device_index,
                    source,
                });
            }
        };

        let mut state = self.state.lock().await;
        state.connected = true;
        state.raw_position = raw_position;
        info!(
            raw_steps = raw_position,
            "The motor position is at {:.2}mm",
            self.steps_to_mm(raw_position)
        );
        Ok(())
    }

    async fn configure_and_sample(&self) -> anyhow::Result<i32> {
        let settings = self.config.actuator;
        self.actuator.set_max_steps(settings.max_steps).await?;
        self.actuator.set_backlash(settings.backlash).await?;
        self.actuator.set_reverse(settings.reverse).await?;
        self.actuator.set_beep(settings.sound).await?;

        match self.actuator.temperature().await {
            Ok(celsius) => info!("The temperature of the EAF is {:.2}°C", celsius),
            Err(e) => warn!(error = %e, "Could not read EAF temperature"),
        }

        self.actuator.position().await
    }

    /// Close the device.
    ///
    /// Best effort and idempotent: a failure is logged, never returned, and a
    /// controller that is not connected sends nothing to the device.
    pub async fn disconnect(&self) {
        {
            let mut state = self.state.lock().await;
            if !state.connected {
                debug!("EAF already disconnected");
                return;
            }
            state.connected = false;
        }
        self.cancel.lock().await.cancel();

        warn!("Trying to disconnect EAF device");
        match self.actuator.disconnect().await {
            Ok(()) => warn!("Disconnected successfully"),
            Err(e) => error!(error = %e, "Did not disconnect properly"),
        }
    }

    /// Whether the controller is connected.
    ///
    /// Logs only when the answer differs from the previous call.
    pub async fn is_ready(&self) -> bool {
        self.state.lock().await.check_ready()
    }

    /// Move to an absolute focus position, clearing any offset.
    #[instrument(skip(self))]
    pub async fn move_to(&self, target_mm: f64) -> FocuserResult<()> {
        let step = self.checked_steps(target_mm)?;
        let (_guard, cancel) = self.begin_move().await?;
        {
            let mut state = self.state.lock().await;
            state.target_mm = target_mm;
            state.offset_mm = 0.0;
        }
        info!("Setting focus to {:.2}mm", target_mm);
        self.drive_to(step, cancel).await
    }

    /// Move to the last absolute target plus `offset_mm`.
    ///
    /// Offsets never accumulate: each call replaces the previous offset.
    #[instrument(skip(self))]
    pub async fn set_offset(&self, offset_mm: f64) -> FocuserResult<()> {
        let (_guard, cancel) = self.begin_move().await?;
        let step = {
            let mut state = self.state.lock().await;
            let step = self.checked_steps(state.target_mm + offset_mm)?;
            state.offset_mm = offset_mm;
            step
        };
        info!("Setting focus offset to {:.2}mm", offset_mm);
        self.drive_to(step, cancel).await
    }

    /// Abort the move being supervised, if any.
    ///
    /// The poll loop stops the motor and returns [`FocuserError::Cancelled`];
    /// the connection stays open.
    pub async fn abort_move(&self) {
        self.cancel.lock().await.cancel();
    }

    /// Current focus: the position minus the active offset.
    ///
    /// Refreshes the position when connected; otherwise, or when the read fails,
    /// the last known position is used.
    pub async fn focus(&self) -> f64 {
        if self.is_ready().await {
            match self.actuator.position().await {
                Ok(raw) => self.state.lock().await.raw_position = raw,
                Err(e) => warn!(error = %e, "Could not read EAF position; using last known"),
            }
        }
        let state = self.state.lock().await;
        self.steps_to_mm(state.raw_position) - state.offset_mm
    }

    /// Active offset in millimetres
    pub async fn offset(&self) -> f64 {
        self.state.lock().await.offset_mm
    }

    /// Last absolute target in millimetres
    pub async fn target(&self) -> f64 {
        self.state.lock().await.target_mm
    }

    /// Last known position in millimetres, without querying the device
    pub async fn position_mm(&self) -> f64 {
        self.steps_to_mm(self.state.lock().await.raw_position)
    }

    /// Last known position in steps, without querying the device
    pub async fn raw_position(&self) -> i32 {
        self.state.lock().await.raw_position
    }

    /// Motor temperature in °C
    pub async fn temperature(&self) -> FocuserResult<f32> {
        if !self.is_ready().await {
            return Err(FocuserError::NotReady);
        }
        self.actuator
            .temperature()
            .await
            .map_err(FocuserError::Actuator)
    }

    /// Motion status as the framework expects it.
    ///
    /// A failed `is_moving` query counts as not moving.
    pub async fn motion_status(&self) -> MotionStatus {
        if !self.is_ready().await {
            return MotionStatus::Initializing;
        }
        match self.actuator.is_moving().await {
            Ok(true) => MotionStatus::Slewing,
            Ok(false) => MotionStatus::Idle,
            Err(e) => {
                warn!(error = %e, "Could not query EAF motion; reporting idle");
                MotionStatus::Idle
            }
        }
    }

    /// Halt the motor. A rejected stop forces a disconnect.
    pub async fn stop(&self) -> FocuserResult<()> {
        if !self.is_ready().await {
            return Err(FocuserError::NotReady);
        }

        info!("Stop motion of the EAF focuser");
        match self.actuator.stop().await {
            Ok(()) => {
                info!("Stopped successfully");
                Ok(())
            }
            Err(source) => {
                error!(
                    error = %source,
                    "EAF did not stop; disconnecting. The software may need a restart"
                );
                self.disconnect().await;
                Err(FocuserError::Stop(source))
            }
        }
    }

    /// Take the move lock and install the token that aborts this move.
    async fn begin_move(&self) -> FocuserResult<(MutexGuard<'_, ()>, CancellationToken)> {
        if !self.is_ready().await {
            return Err(FocuserError::NotReady);
        }
        let guard = self.move_lock.try_lock().map_err(|_| FocuserError::Busy)?;
        let token = CancellationToken::new();
        *self.cancel.lock().await = token.clone();
        Ok((guard, token))
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Disconnect after a driver failure and wrap it.
    ///
    /// A failure caused by a disconnect from elsewhere is reported as `NotReady`.
    async fn escalate(&self, source: anyhow::Error) -> FocuserError {
        if !self.is_connected().await {
            debug!(error = %source, "EAF query failed after disconnect");
            return FocuserError::NotReady;
        }
        error!(error = %source, "EAF stopped responding during a move");
        self.disconnect().await;
        FocuserError::Actuator(source)
    }

    /// Outcome of a cancelled move: a disconnect ends it without touching the
    /// device, an abort stops the motor first.
    async fn interrupted(&self) -> FocuserError {
        if !self.is_connected().await {
            warn!("EAF disconnected during a move");
            return FocuserError::NotReady;
        }
        warn!("EAF move aborted; stopping motor");
        if let Err(e) = self.actuator.stop().await {
            warn!(error = %e, "Stop after abort failed");
        }
        FocuserError::Cancelled
    }

    /// Command the move and supervise it. Caller holds the move lock.
    async fn drive_to(&self, step: i32, cancel: CancellationToken) -> FocuserResult<()> {
        if cancel.is_cancelled() {
            return Err(self.interrupted().await);
        }

        let already_moving = match self.actuator.is_moving().await {
            Ok(moving) => moving,
            Err(e) => return Err(self.escalate(e).await),
        };
        if already_moving {
            debug!("EAF already moving; stopping before new move");
            if let Err(e) = self.actuator.stop().await {
                warn!(error = %e, "Stopping the previous move failed; commanding new move anyway");
            }
        }

        if let Err(source) = self.actuator.move_to(step).await {
            error!(step, error = %source, "Was not able to move the EAF motor; disconnecting");
            self.disconnect().await;
            return Err(FocuserError::Move { step, source });
        }

        let interval = self.config.timing.poll_interval();
        let limit = self.config.timing.time_limit();
        let mut elapsed = Duration::ZERO;

        loop {
            if !self.is_connected().await {
                return Err(FocuserError::NotReady);
            }
            let moving = match self.actuator.is_moving().await {
                Ok(moving) => moving,
                Err(e) => return Err(self.escalate(e).await),
            };
            let raw_steps = match self.actuator.position().await {
                Ok(raw) => raw,
                Err(e) => return Err(self.escalate(e).await),
            };
            self.state.lock().await.raw_position = raw_steps;

            let position_mm = self.steps_to_mm(raw_steps);
            // No receivers is fine
            let _ = self.updates.send(PositionUpdate {
                raw_steps,
                position_mm,
                moving,
            });

            if !moving {
                info!("EAF focus move finished at {:.4}mm", position_mm);
                return Ok(());
            }
            info!("EAF focusing motor is moving! Focus position: {:.4}mm", position_mm);

            if elapsed > limit {
                error!(?elapsed, step, "EAF move timed out; disconnecting");
                self.disconnect().await;
                return Err(FocuserError::MotionTimeout { elapsed });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(self.interrupted().await),
                _ = tokio::time::sleep(interval) => {}
            }
            elapsed += interval;
        }
    }
}

#[async_trait]
impl<A: Actuator + 'static> Focuser for FocusController<A> {
    async fn set_focus(&self, focus_mm: f64) -> FocuserResult<()> {
        self.move_to(focus_mm).await
    }

    async fn set_focus_offset(&self, offset_mm: f64) -> FocuserResult<()> {
        self.set_offset(offset_mm).await
    }

    async fn focus(&self) -> FocuserResult<f64> {
        Ok(FocusController::focus(self).await)
    }

    async fn focus_offset(&self) -> f64 {
        self.offset().await
    }

    async fn motion_status(&self) -> FocuserResult<MotionStatus> {
        Ok(FocusController::motion_status(self).await)
    }

    async fn stop_motion(&self) -> FocuserResult<()> {
        self.stop().await
    }

    async fn is_ready(&self) -> bool {
        FocusController::is_ready(self).await
    }
}

#[async_trait]
impl<A: Actuator + 'static> Module for FocusController<A> {
    async fn open(&self) -> FocuserResult<()> {
        self.connect().await
    }

    async fn close(&self) {
        warn!("The focuser module was asked to close; closing USB connection to the EAF");
        self.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_STEP_TO_MM, MotionTiming};
    use crate::hardware::mock::{ActuatorCall, MockActuator};
    use tracing_test::traced_test;

    fn fast_config() -> FocuserConfig {
        FocuserConfig {
            timing: MotionTiming {
                poll_interval_ms: 1,
                time_limit_ms: 20,
            },
            ..Default::default()
        }
    }

    #[test]
    fn one_millimetre_is_413_steps() {
        // 1.0 / 0.00242105263 = 413.04...
        assert_eq!(mm_to_steps(1.0, DEFAULT_STEP_TO_MM), 413);
    }

    #[test]
    fn conversion_truncates_toward_zero() {
        assert_eq!(mm_to_steps(2.5 * DEFAULT_STEP_TO_MM, DEFAULT_STEP_TO_MM), 2);
        assert_eq!(mm_to_steps(-2.5 * DEFAULT_STEP_TO_MM, DEFAULT_STEP_TO_MM), -2);
        assert_eq!(mm_to_steps(0.999 * DEFAULT_STEP_TO_MM, DEFAULT_STEP_TO_MM), 0);
    }

    #[test]
    fn conversion_round_trips_integer_steps() {
        for steps in (0..=60_000).step_by(7).chain([1, 59_999, 60_000]) {
            let mm = steps_to_mm(steps, DEFAULT_STEP_TO_MM);
            assert_eq!(mm_to_steps(mm, DEFAULT_STEP_TO_MM), steps, "steps = {steps}");
        }
    }

    #[test]
    fn conversion_saturates() {
        assert_eq!(mm_to_steps(1e12, DEFAULT_STEP_TO_MM), i32::MAX);
        assert_eq!(mm_to_steps(f64::NAN, DEFAULT_STEP_TO_MM), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn ready_logged_once_per_transition() {
        let eaf = Arc::new(MockActuator::new());
        let focuser = FocusController::new(eaf, fast_config());

        assert!(!focuser.is_ready().await);
        focuser.connect().await.unwrap();
        for _ in 0..5 {
            assert!(focuser.is_ready().await);
        }
        focuser.disconnect().await;
        for _ in 0..3 {
            assert!(!focuser.is_ready().await);
        }

        logs_assert(|lines: &[&str]| {
            let ready = lines
                .iter()
                .filter(|l| l.contains("EAF is connected and ready"))
                .count();
            let not_ready = lines
                .iter()
                .filter(|l| l.contains("EAF is not connected and not ready"))
                .count();
            match (ready, not_ready) {
                (1, 1) => Ok(()),
                other => Err(format!("unexpected readiness log counts {:?}", other)),
            }
        });
    }

    #[tokio::test]
    #[traced_test]
    async fn ready_logged_again_after_reconnect() {
        let eaf = Arc::new(MockActuator::new());
        let focuser = FocusController::new(eaf, fast_config());

        focuser.connect().await.unwrap();
        assert!(focuser.is_ready().await);
        focuser.disconnect().await;
        assert!(!focuser.is_ready().await);
        focuser.connect().await.unwrap();
        assert!(focuser.is_ready().await);
        assert!(focuser.is_ready().await);

        logs_assert(|lines: &[&str]| {
            let ready = lines
                .iter()
                .filter(|l| l.contains("EAF is connected and ready"))
                .count();
            if ready == 2 {
                Ok(())
            } else {
                Err(format!("expected 2 ready messages, got {}", ready))
            }
        });
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_disconnect_is_logged_not_raised() {
        let eaf = Arc::new(MockActuator::new());
        let focuser = FocusController::new(eaf.clone(), fast_config());
        focuser.connect().await.unwrap();

        eaf.set_faults(crate::hardware::mock::MockFaults {
            disconnect: true,
            ..Default::default()
        })
        .await;
        focuser.disconnect().await;

        assert!(!focuser.is_ready().await);
        assert!(logs_contain("Did not disconnect properly"));
    }

    #[tokio::test]
    async fn abort_between_lock_and_command_is_honoured() {
        let eaf = Arc::new(MockActuator::new());
        let focuser = FocusController::new(eaf.clone(), fast_config());
        focuser.connect().await.unwrap();

        let (_guard, cancel) = focuser.begin_move().await.unwrap();
        focuser.abort_move().await;
        let result = focuser.drive_to(413, cancel).await;

        assert!(matches!(result, Err(FocuserError::Cancelled)));
        assert_eq!(eaf.count(ActuatorCall::MoveTo(413)).await, 0);
        assert!(focuser.is_ready().await);
    }

    #[tokio::test]
    async fn updates_published_for_each_poll() {
        let eaf = Arc::new(MockActuator::new().with_steps_per_poll(200));
        let focuser = FocusController::new(eaf, fast_config());
        let mut rx = focuser.subscribe();

        focuser.connect().await.unwrap();
        focuser.move_to(1.0).await.unwrap();

        let mut samples = Vec::new();
        while let Ok(update) = rx.try_recv() {
            samples.push(update);
        }
        let raw: Vec<i32> = samples.iter().map(|u| u.raw_steps).collect();
        assert_eq!(raw, vec![200, 400, 413]);
        assert!(samples[0].moving && samples[1].moving && !samples[2].moving);
        for update in samples {
            assert_eq!(update.position_mm, steps_to_mm(update.raw_steps, DEFAULT_STEP_TO_MM));
        }
    }
}
