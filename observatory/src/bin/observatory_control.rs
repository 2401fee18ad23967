//! Command-line entry point for observatory automation.
//!
//! Each subcommand maps onto one observatory command:
//! - `set-light`, `telescope-cover`, `roof`: switch accessories
//! - `target`: slew to a named object
//! - `sequence`: guided, dithered exposures of a target through one filter
//! - `focus`: relative focuser move
//! - `show-image`: open a captured frame in the image viewer
//! - `plan`: run a JSON list of commands (the cron entry point)
//! - `resolve`: print where a target is without moving anything
//! - `show-config`: print the effective configuration
//!
//! The INDI server and PHD2 must already be running.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use ephemeris::{CatalogResolver, ChainResolver, ObserverSite, SimbadResolver};
use hardware::devices::{FocusDirection, Mount};
use hardware::indi::IndiClient;
use hardware::phd2::Phd2Client;
use observatory::commands::{choose_site, show_image};
use observatory::logging::init_logging;
use observatory::plan::{load_plan, run_plan};
use observatory::targeting::locate;
use observatory::{
    AlwaysConfirm, Command, Confirm, Observatory, ObservatoryConfig, Outcome, SequenceRequest,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{info, warn};

/// Observatory control through INDI and PHD2
#[derive(Parser, Debug)]
#[command(name = "observatory_control")]
#[command(about = "Control the observatory mount, camera, accessories and guiding")]
#[command(version)]
struct Args {
    /// Configuration file (JSON); defaults to /etc/observatory/config.json if present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Continue without asking when a target is below the altitude limit
    #[arg(short, long, global = true)]
    yes: bool,

    /// Log file, overriding the configuration
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Switch the red light
    SetLight {
        #[arg(long)]
        state: String,
    },

    /// Open or close the telescope cover
    TelescopeCover {
        #[arg(long)]
        state: String,
    },

    /// Open or close the roof
    Roof {
        #[arg(long)]
        state: String,
    },

    /// Slew to a named target
    Target {
        #[arg(long)]
        target_name: String,
    },

    /// Capture a guided sequence of exposures
    Sequence {
        #[arg(long)]
        target: String,

        #[arg(long)]
        base_directory: PathBuf,

        /// Filter name from the configured filter table
        #[arg(long)]
        filter_name: String,

        #[arg(long, default_value = "1")]
        exposure_count: u32,

        /// Seconds per exposure
        #[arg(long)]
        exposure_time: f64,

        /// Assume the mount already points at the target
        #[arg(long)]
        no_slew: bool,
    },

    /// Move the focuser
    Focus {
        /// in or out; defaults to the configured direction
        #[arg(long)]
        direction: Option<FocusDirection>,

        /// Steps to move; defaults to the configured step count
        #[arg(long)]
        steps: Option<u32>,
    },

    /// Open a captured frame in the image viewer
    ShowImage {
        #[arg(long)]
        directory: PathBuf,

        /// File name without the .fits extension
        #[arg(long)]
        image_name: String,
    },

    /// Run the commands in a JSON plan file
    Plan {
        file: PathBuf,

        /// Run the remaining commands after a failure
        #[arg(long)]
        keep_going: bool,
    },

    /// Print the position and altitude of a target
    Resolve { target_name: String },

    /// Print the effective configuration as JSON
    ShowConfig,
}

/// Asks on the terminal; anything but y/yes declines, as does a missing terminal.
struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                warn!("Cannot prompt for confirmation: {e}");
                return false;
            }
        };
        match editor.readline(prompt) {
            Ok(answer) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => false,
            Err(e) => {
                warn!("Cannot prompt for confirmation: {e}");
                false
            }
        }
    }
}

fn to_command(command: CliCommand) -> Option<Command> {
    let command = match command {
        CliCommand::SetLight { state } => Command::SetLight { state },
        CliCommand::TelescopeCover { state } => Command::TelescopeCover { state },
        CliCommand::Roof { state } => Command::Roof { state },
        CliCommand::Target { target_name } => Command::Target { target_name },
        CliCommand::Sequence {
            target,
            base_directory,
            filter_name,
            exposure_count,
            exposure_time,
            no_slew,
        } => Command::Sequence(SequenceRequest {
            target,
            base_directory,
            filter_name,
            exposure_count,
            exposure_time,
            slew: !no_slew,
        }),
        CliCommand::Focus { direction, steps } => Command::Focus { direction, steps },
        CliCommand::ShowImage {
            directory,
            image_name,
        } => Command::ShowImage {
            directory,
            image_name,
        },
        CliCommand::Plan { .. } | CliCommand::Resolve { .. } | CliCommand::ShowConfig => {
            return None
        }
    };
    Some(command)
}

fn resolver(config: &ObservatoryConfig) -> Result<ChainResolver> {
    let catalog: CatalogResolver = config.targets.iter().collect();
    Ok(ChainResolver::new()
        .with(Box::new(catalog))
        .with(Box::new(SimbadResolver::new()?)))
}

fn connect(config: &ObservatoryConfig, yes: bool, commands: &[Command]) -> Result<Observatory> {
    let client = IndiClient::connect(config.indi_address.as_str())
        .with_context(|| format!("cannot reach the INDI server at {}", config.indi_address))?;
    let confirm: Box<dyn Confirm> = if yes {
        Box::new(AlwaysConfirm)
    } else {
        Box::new(TerminalConfirm)
    };
    let mut observatory = Observatory::new(config.clone(), Arc::new(client), Box::new(resolver(config)?))
        .with_confirm(confirm);

    if commands.iter().any(Command::needs_guider) {
        match Phd2Client::connect(config.phd2_address.as_str()) {
            Ok(guider) => observatory = observatory.with_guider(Arc::new(guider)),
            Err(e) => warn!("Cannot reach PHD2 at {}: {e}", config.phd2_address),
        }
    }
    Ok(observatory)
}

/// Site for `resolve`: whatever the mount reports, else the configured one.
fn resolve_site(config: &ObservatoryConfig) -> Result<ObserverSite> {
    let reported = match IndiClient::connect(config.indi_address.as_str()) {
        Ok(client) => Mount::new(Arc::new(client), &config.devices.mount).site()?,
        Err(e) => {
            warn!("Cannot reach INDI at {}: {e}", config.indi_address);
            None
        }
    };
    Ok(choose_site(reported, config.site)?)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = ObservatoryConfig::load(args.config.as_deref())?;
    if let Some(log_file) = args.log_file {
        config.log_file = log_file;
    }
    init_logging(Some(&config.log_file));
    match ObservatoryConfig::source(args.config.as_deref()) {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("Using built-in configuration"),
    }

    match args.command {
        CliCommand::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        CliCommand::Resolve { target_name } => {
            let site = resolve_site(&config)?;
            let position = locate(&resolver(&config)?, &target_name, &site, Utc::now())?;
            println!(
                "{}: RA {:.5}h DEC {:+.4}° (J2000), RA {:.5}h DEC {:+.4}° (now), altitude {:.2}°, azimuth {:.2}°",
                position.name,
                position.j2000.ra_hours(),
                position.j2000.dec_deg,
                position.of_date.ra_hours(),
                position.of_date.dec_deg,
                position.horizontal.altitude_deg,
                position.horizontal.azimuth_deg
            );
        }
        CliCommand::ShowImage {
            directory,
            image_name,
        } => {
            show_image(&config.image_viewer, &directory, &image_name)?;
        }
        CliCommand::Plan { file, keep_going } => {
            let commands = load_plan(&file)?;
            let observatory = connect(&config, args.yes, &commands)?;
            let summary = run_plan(&observatory, &commands, keep_going);
            if !summary.succeeded() {
                for (step, name, error) in &summary.failures {
                    eprintln!("step {step} ({name}) failed: {error}");
                }
                bail!("{} of {} plan steps failed", summary.failures.len(), commands.len());
            }
        }
        other => {
            let Some(command) = to_command(other) else {
                return Ok(());
            };
            let observatory = connect(&config, args.yes, std::slice::from_ref(&command))?;
            match observatory.execute(&command)? {
                Outcome::Done => {}
                Outcome::Aborted => println!("Aborted by operator"),
                Outcome::Sequence(report) => {
                    info!("{} images in {}", report.images.len(), report.directory.display());
                    println!("{}", report.directory.display());
                }
            }
        }
    }
    Ok(())
}
