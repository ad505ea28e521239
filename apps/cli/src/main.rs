use std::path::PathBuf;

use anyhow::Result;
use bmsboot_core::commands;
use bmsboot_core::config::{Interface, ToolConfig};
use bmsboot_core::events::ProgressSink;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

/// Exit status for unusable configuration files.
const EXIT_CONFIG: i32 = 64;

#[derive(Parser, Debug)]
#[command(author, version, about = "foxBMS CAN bootloader tool", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// CAN adapter kind
    #[arg(long, value_enum)]
    interface: Option<InterfaceArg>,

    /// Serial device (slcan) or kernel interface (socketcan)
    #[arg(long)]
    channel: Option<String>,

    /// Bus bitrate in bit/s
    #[arg(long)]
    bitrate: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether the bootloader is ready
    Check,

    /// Return the bootloader to its idle state
    Reset {
        /// Seconds to wait for the target to restart
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Flash the application
    Load {
        /// Directory holding foxbms.bin, foxbms.crc64.csv and foxbms.crc64.json
        #[arg(long, value_name = "DIR")]
        artifacts: Option<PathBuf>,

        /// Seconds to wait for the target to restart after a reset
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Start the flashed application
    Run,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum InterfaceArg {
    Slcan,
    Socketcan,
}

impl From<InterfaceArg> for Interface {
    fn from(arg: InterfaceArg) -> Self {
        match arg {
            InterfaceArg::Slcan => Interface::Slcan,
            InterfaceArg::Socketcan => Interface::Socketcan,
        }
    }
}

/// Progress bar shown while flashing.
struct BarProgress(ProgressBar);

impl BarProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
                .progress_chars("#>-"),
        );
        Ok(Self(bar))
    }
}

impl ProgressSink for BarProgress {
    fn advance(&self, delta: u32) {
        self.0.inc(u64::from(delta));
    }

    fn complete(&self) {
        self.0.finish_with_message("Flash complete");
    }
}

fn load_config(args: &Args) -> Result<ToolConfig> {
    let mut config = match &args.config {
        Some(path) => ToolConfig::load_from_file(path)?,
        None => ToolConfig::default(),
    };
    if let Some(interface) = args.interface {
        config.bus.interface = interface.into();
    }
    if let Some(channel) = &args.channel {
        config.bus.channel = channel.clone();
    }
    if let Some(bitrate) = args.bitrate {
        config.bus.bitrate = bitrate;
    }
    if let Command::Load {
        artifacts: Some(dir),
        ..
    } = &args.command
    {
        config.artifacts_dir = Some(dir.clone());
    }
    Ok(config)
}

fn run(args: &Args, config: &ToolConfig) -> Result<i32> {
    let code = match &args.command {
        Command::Check => commands::check_bootloader(config),
        Command::Reset { timeout } => commands::reset_bootloader(config, *timeout),
        Command::Load { timeout, .. } => {
            let progress = BarProgress::new()?;
            let code = commands::load_app(config, *timeout, &progress);
            if code != 0 {
                progress.0.abandon();
            }
            code
        }
        Command::Run => commands::run_app(config),
    };
    Ok(code)
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Cannot load configuration: {:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    info!(
        interface = %config.bus.interface,
        channel = %config.bus.channel,
        bitrate = config.bus.bitrate,
        "Using bus"
    );

    match run(&args, &config) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
    }
}
