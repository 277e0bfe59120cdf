//! ZWO EAF SDK driver
//!
//! Binds `libEAFFocuser` and exposes it as an [`Actuator`]. Only compiled with the
//! `eaf_sdk` feature; the library must be on the linker path.
//!
//! SDK calls block on USB I/O, so each one runs on the blocking pool.

#![allow(unsafe_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::ffi::CStr;
use std::os::raw::{c_char, c_float, c_int};
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, info};

use crate::hardware::capabilities::Actuator;

const EAF_SUCCESS: c_int = 0;
const NO_DEVICE: i32 = -1;

#[repr(C)]
#[derive(Debug)]
struct EafInfo {
    id: c_int,
    name: [c_char; 64],
    max_step: c_int,
}

impl Default for EafInfo {
    fn default() -> Self {
        Self {
            id: 0,
            name: [0; 64],
            max_step: 0,
        }
    }
}

#[link(name = "EAFFocuser")]
extern "C" {
    fn EAFGetNum() -> c_int;
    fn EAFGetID(index: c_int, id: *mut c_int) -> c_int;
    fn EAFGetProperty(id: c_int, info: *mut EafInfo) -> c_int;
    fn EAFOpen(id: c_int) -> c_int;
    fn EAFClose(id: c_int) -> c_int;
    fn EAFMove(id: c_int, step: c_int) -> c_int;
    fn EAFStop(id: c_int) -> c_int;
    fn EAFIsMoving(id: c_int, moving: *mut bool, hand_control: *mut bool) -> c_int;
    fn EAFGetPosition(id: c_int, step: *mut c_int) -> c_int;
    // Misspelling is the SDK's
    fn EAFResetPostion(id: c_int, step: c_int) -> c_int;
    fn EAFGetTemp(id: c_int, temp: *mut c_float) -> c_int;
    fn EAFSetReverse(id: c_int, reverse: bool) -> c_int;
    fn EAFGetReverse(id: c_int, reverse: *mut bool) -> c_int;
    fn EAFSetBacklash(id: c_int, backlash: c_int) -> c_int;
    fn EAFGetBacklash(id: c_int, backlash: *mut c_int) -> c_int;
    fn EAFSetMaxStep(id: c_int, step: c_int) -> c_int;
    fn EAFGetMaxStep(id: c_int, step: *mut c_int) -> c_int;
    fn EAFStepRange(id: c_int, range: *mut c_int) -> c_int;
    fn EAFSetBeep(id: c_int, beep: bool) -> c_int;
    fn EAFGetBeep(id: c_int, beep: *mut bool) -> c_int;
}

fn check(code: c_int, what: &str) -> Result<()> {
    if code == EAF_SUCCESS {
        Ok(())
    } else {
        Err(anyhow!("EAF {} failed with SDK error code {}", what, code))
    }
}

fn to_c_int(value: u32) -> Result<c_int> {
    c_int::try_from(value).map_err(|_| anyhow!("value {} exceeds the SDK range", value))
}

/// Run an SDK call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow!("Task join error: {}", e))?
}

/// One EAF unit opened through the vendor SDK.
#[derive(Debug)]
pub struct EafDriver {
    id: AtomicI32,
}

impl EafDriver {
    /// Driver with no device open
    pub fn new() -> Self {
        Self {
            id: AtomicI32::new(NO_DEVICE),
        }
    }

    /// Number of EAF units on the bus
    pub async fn device_count() -> Result<u32> {
        // SAFETY: no arguments, no shared state
        let count = blocking(|| Ok(unsafe { EAFGetNum() })).await?;
        Ok(u32::try_from(count).unwrap_or(0))
    }

    fn device(&self) -> Result<c_int> {
        match self.id.load(Ordering::Acquire) {
            NO_DEVICE => bail!("EAF device is not open"),
            id => Ok(id),
        }
    }
}

impl Default for EafDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Actuator for EafDriver {
    async fn connect(&self, device_index: u32) -> Result<()> {
        let index = to_c_int(device_index)?;
        let (id, name, max_step) = blocking(move || {
            // SAFETY: all out-pointers reference live locals for the duration of each call
            unsafe {
                let count = EAFGetNum();
                if index >= count {
                    bail!("no EAF at index {} ({} attached)", index, count);
                }
                let mut id: c_int = 0;
                check(EAFGetID(index, &mut id), "get id")?;
                let mut info = EafInfo::default();
                check(EAFGetProperty(id, &mut info), "get property")?;
                check(EAFOpen(id), "open")?;
                let name = CStr::from_ptr(info.name.as_ptr())
                    .to_string_lossy()
                    .into_owned();
                Ok((id, name, info.max_step))
            }
        })
        .await?;

        self.id.store(id, Ordering::Release);
        info!(id, name = %name, max_step, "Opened EAF");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let id = self.device()?;
        // SAFETY: id refers to an opened device
        blocking(move || check(unsafe { EAFClose(id) }, "close")).await?;
        self.id.store(NO_DEVICE, Ordering::Release);
        debug!(id, "Closed EAF");
        Ok(())
    }

    async fn set_max_steps(&self, steps: u32) -> Result<()> {
        let id = self.device()?;
        let steps = to_c_int(steps)?;
        // SAFETY: id refers to an opened device
        blocking(move || check(unsafe { EAFSetMaxStep(id, steps) }, "set max step")).await
    }

    async fn set_backlash(&self, steps: u32) -> Result<()> {
        let id = self.device()?;
        let steps = to_c_int(steps)?;
        // SAFETY: id refers to an opened device
        blocking(move || check(unsafe { EAFSetBacklash(id, steps) }, "set backlash")).await
    }

    async fn set_reverse(&self, reverse: bool) -> Result<()> {
        let id = self.device()?;
        // SAFETY: id refers to an opened device
        blocking(move || check(unsafe { EAFSetReverse(id, reverse) }, "set reverse")).await
    }

    async fn set_beep(&self, beep: bool) -> Result<()> {
        let id = self.device()?;
        // SAFETY: id refers to an opened device
        blocking(move || check(unsafe { EAFSetBeep(id, beep) }, "set beep")).await
    }

    async fn move_to(&self, step: i32) -> Result<()> {
        let id = self.device()?;
        blocking(move || {
            let mut moving = false;
            let mut hand_control = false;
            // SAFETY: id refers to an opened device; out-pointers are live locals
            unsafe {
                check(
                    EAFIsMoving(id, &mut moving, &mut hand_control),
                    "is moving",
                )?;
                if moving {
                    bail!("EAF is already moving");
                }
                check(EAFMove(id, step), "move")
            }
        })
        .await
    }

    async fn stop(&self) -> Result<()> {
        let id = self.device()?;
        // SAFETY: id refers to an opened device
        blocking(move || check(unsafe { EAFStop(id) }, "stop")).await
    }

    async fn is_moving(&self) -> Result<bool> {
        let id = self.device()?;
        blocking(move || {
            let mut moving = false;
            let mut hand_control = false;
            // SAFETY: id refers to an opened device; out-pointers are live locals
            check(
                unsafe { EAFIsMoving(id, &mut moving, &mut hand_control) },
                "is moving",
            )?;
            Ok(moving)
        })
        .await
    }

    async fn position(&self) -> Result<i32> {
        let id = self.device()?;
        blocking(move || {
            let mut step: c_int = 0;
            // SAFETY: id refers to an opened device; out-pointer is a live local
            check(unsafe { EAFGetPosition(id, &mut step) }, "get position")?;
            Ok(step)
        })
        .await
    }

    async fn temperature(&self) -> Result<f32> {
        let id = self.device()?;
        blocking(move || {
            let mut temp: c_float = 0.0;
            // SAFETY: id refers to an opened device; out-pointer is a live local
            check(unsafe { EAFGetTemp(id, &mut temp) }, "get temperature")?;
            Ok(temp)
        })
        .await
    }

    async fn reset_position(&self, step: i32) -> Result<()> {
        let id = self.device()?;
        // SAFETY: id refers to an opened device
        blocking(move || check(unsafe { EAFResetPostion(id, step) }, "reset position")).await
    }

    async fn max_steps(&self) -> Result<u32> {
        let id = self.device()?;
        let steps = blocking(move || {
            let mut steps: c_int = 0;
            // SAFETY: id refers to an opened device; out-pointer is a live local
            check(unsafe { EAFGetMaxStep(id, &mut steps) }, "get max step")?;
            Ok(steps)
        })
        .await?;
        Ok(u32::try_from(steps)?)
    }

    async fn step_range(&self) -> Result<u32> {
        let id = self.device()?;
        let range = blocking(move || {
            let mut range: c_int = 0;
            // SAFETY: id refers to an opened device; out-pointer is a live local
            check(unsafe { EAFStepRange(id, &mut range) }, "get step range")?;
            Ok(range)
        })
        .await?;
        Ok(u32::try_from(range)?)
    }

    async fn backlash(&self) -> Result<u32> {
        let id = self.device()?;
        let backlash = blocking(move || {
            let mut backlash: c_int = 0;
            // SAFETY: id refers to an opened device; out-pointer is a live local
            check(unsafe { EAFGetBacklash(id, &mut backlash) }, "get backlash")?;
            Ok(backlash)
        })
        .await?;
        Ok(u32::try_from(backlash)?)
    }

    async fn reverse(&self) -> Result<bool> {
        let id = self.device()?;
        blocking(move || {
            let mut reverse = false;
            // SAFETY: id refers to an opened device; out-pointer is a live local
            check(unsafe { EAFGetReverse(id, &mut reverse) }, "get reverse")?;
            Ok(reverse)
        })
        .await
    }

    async fn beep(&self) -> Result<bool> {
        let id = self.device()?;
        blocking(move || {
            let mut beep = false;
            // SAFETY: id refers to an opened device; out-pointer is a live local
            check(unsafe { EAFGetBeep(id, &mut beep) }, "get beep")?;
            Ok(beep)
        })
        .await
    }
}
