//! CLI Entry Point for eaf-focuser
//!
//! Operator tool for bench-testing a ZWO EAF without the observatory framework:
//! read out the device state, drive it in steps or millimetres, stop it and
//! change its persistent settings.
//!
//! Built with the `eaf_sdk` feature it talks to the real focuser; otherwise it
//! drives a simulated one.
//!
//! # Usage
//!
//! ```bash
//! eaf-focuser status
//! eaf-focuser focus --mm 12.5 --offset 0.05
//! eaf-focuser --device 1 move --steps 4000
//! eaf-focuser configure --backlash 20 --sound false
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eaf_focuser::config::AppConfig;
use eaf_focuser::hardware::{Actuator, FocusController};
use eaf_focuser::logging;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Parser)]
#[command(name = "eaf-focuser")]
#[command(about = "Operate a ZWO EAF electronic focuser", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config/focuser.toml")]
    config: PathBuf,

    /// USB index of the EAF, overriding the configuration
    #[arg(long, global = true)]
    device: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print temperature, travel, position and settings
    Status,

    /// Move to an absolute position in steps
    Move {
        #[arg(long, allow_hyphen_values = true)]
        steps: i32,
    },

    /// Move to an absolute focus in millimetres, optionally with an offset
    Focus {
        #[arg(long, allow_hyphen_values = true)]
        mm: f64,

        #[arg(long, allow_hyphen_values = true)]
        offset: Option<f64>,
    },

    /// Halt the motor
    Stop,

    /// Redefine the current position without moving
    SetPosition {
        #[arg(long, allow_hyphen_values = true)]
        steps: i32,
    },

    /// Change and apply actuator settings
    Configure {
        #[arg(long)]
        max_steps: Option<u32>,

        #[arg(long)]
        backlash: Option<u32>,

        #[arg(long)]
        reverse: Option<bool>,

        #[arg(long)]
        sound: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)?;
    if let Some(device) = cli.device {
        config.focuser.actuator.device_index = device;
    }
    if let Commands::Configure {
        max_steps,
        backlash,
        reverse,
        sound,
    } = &cli.command
    {
        let actuator = &mut config.focuser.actuator;
        actuator.max_steps = max_steps.unwrap_or(actuator.max_steps);
        actuator.backlash = backlash.unwrap_or(actuator.backlash);
        actuator.reverse = reverse.unwrap_or(actuator.reverse);
        actuator.sound = sound.unwrap_or(actuator.sound);
    }
    config.validate()?;
    logging::init_from_config(&config)?;

    #[cfg(feature = "eaf_sdk")]
    let actuator = Arc::new(eaf_focuser::hardware::EafDriver::new());

    #[cfg(not(feature = "eaf_sdk"))]
    let actuator = {
        warn!("Built without the eaf_sdk feature; driving a simulated EAF");
        Arc::new(eaf_focuser::hardware::MockActuator::new().with_steps_per_poll(250))
    };

    let focuser = FocusController::new(actuator, config.focuser.clone());
    focuser.connect().await?;

    let outcome = run(&focuser, cli.command).await;
    focuser.disconnect().await;
    outcome
}

async fn run<A: Actuator>(focuser: &FocusController<A>, command: Commands) -> Result<()> {
    let eaf = focuser.actuator();

    match command {
        Commands::Status => {
            println!("Temperature: {:.2} °C", focuser.temperature().await?);
            match eaf.step_range().await {
                Ok(range) => println!("Step range:  {}", range),
                Err(_) => println!("Step range:  unavailable while moving"),
            }
            println!("Moving:      {}", eaf.is_moving().await?);
            let position = eaf.position().await?;
            println!(
                "Position:    {} steps ({:.4} mm)",
                position,
                focuser.steps_to_mm(position)
            );
            println!("Max step:    {}", eaf.max_steps().await?);
            println!("Beep:        {}", eaf.beep().await?);
            println!("Reversed:    {}", eaf.reverse().await?);
            println!("Backlash:    {}", eaf.backlash().await?);
        }

        Commands::Move { steps } => {
            let target = focuser.steps_to_mm(steps);
            abortable(focuser, focuser.move_to(target)).await?;
            println!("Position: {} steps", focuser.raw_position().await);
        }

        Commands::Focus { mm, offset } => {
            abortable(focuser, focuser.move_to(mm)).await?;
            if let Some(offset) = offset {
                abortable(focuser, focuser.set_offset(offset)).await?;
            }
            println!(
                "Focus: {:.4} mm (offset {:.4} mm, motor at {} steps)",
                focuser.focus().await,
                focuser.offset().await,
                focuser.raw_position().await
            );
        }

        Commands::Stop => {
            focuser.stop().await?;
            println!("Stopped at {} steps", eaf.position().await?);
        }

        Commands::SetPosition { steps } => {
            eaf.reset_position(steps)
                .await
                .context("EAF refused to redefine its position")?;
            println!("Position redefined as {} steps", eaf.position().await?);
        }

        Commands::Configure { .. } => {
            // The new settings were applied on connect
            println!("Max step: {}", eaf.max_steps().await?);
            println!("Backlash: {}", eaf.backlash().await?);
            println!("Reversed: {}", eaf.reverse().await?);
            println!("Beep:     {}", eaf.beep().await?);
        }
    }

    Ok(())
}

/// Await a move, aborting it on Ctrl-C.
async fn abortable<A, F>(focuser: &FocusController<A>, motion: F) -> Result<()>
where
    A: Actuator,
    F: Future<Output = eaf_focuser::FocuserResult<()>>,
{
    tokio::pin!(motion);
    let result = tokio::select! {
        result = &mut motion => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Ctrl-C received; aborting move");
            focuser.abort_move().await;
            motion.await
        }
    };
    Ok(result?)
}
