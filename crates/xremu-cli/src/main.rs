//! xremu CLI: run a headless emulated device, list devices, manage settings.

#![forbid(unsafe_code)]

mod headless;
mod run;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use xremu_common::{EmulatorSettings, JsonFileStore};
use xremu_vr::{catalog, SessionMode};

use crate::run::RunConfig;

const STORE_FILE: &str = "store.json";

#[derive(Parser, Debug)]
#[command(name = "xremu")]
#[command(about = "Emulated WebXR device runtime")]
struct Args {
    /// Directory holding the settings and persistent anchor store
    #[arg(long, global = true, env = "XREMU_DATA_DIR", default_value = ".xremu")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in device definitions
    Devices,

    /// Drive a headless device from a JSON-lines control script
    Run {
        /// Device key; defaults to the one stored in the settings
        #[arg(long, env = "XREMU_DEVICE")]
        device: Option<String>,

        /// Control script, one action per line (stdin when omitted)
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Session mode to request
        #[arg(long, value_enum, default_value_t = ModeArg::ImmersiveVr)]
        mode: ModeArg,

        /// Required session feature (repeatable)
        #[arg(long = "require")]
        required: Vec<String>,

        /// Optional session feature (repeatable)
        #[arg(long = "optional")]
        optional: Vec<String>,

        /// Frame rate of the loop
        #[arg(long, env = "XREMU_FPS", default_value_t = 72)]
        fps: u32,

        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,

        /// Page origin persistent anchors are scoped to
        #[arg(long, env = "XREMU_ORIGIN", default_value = "http://localhost")]
        origin: String,
    },

    /// Inspect or reset the stored emulator settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Print the effective settings as JSON
    Show,
    /// Remove the stored settings
    Reset,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Inline,
    ImmersiveVr,
    ImmersiveAr,
}

impl From<ModeArg> for SessionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Inline => SessionMode::Inline,
            ModeArg::ImmersiveVr => SessionMode::ImmersiveVr,
            ModeArg::ImmersiveAr => SessionMode::ImmersiveAr,
        }
    }
}

fn open_store(data_dir: &Path) -> Result<JsonFileStore> {
    Ok(JsonFileStore::open(data_dir.join(STORE_FILE))?)
}

fn main() -> Result<()> {
    xremu_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Devices => {
            for device in catalog() {
                let modes: Vec<&str> = device.modes.iter().map(|m| m.as_str()).collect();
                println!(
                    "{:<20} {:<24} {}",
                    device.id,
                    device.profile,
                    modes.join(", ")
                );
            }
        }
        Command::Run {
            device,
            script,
            mode,
            required,
            optional,
            fps,
            frames,
            origin,
        } => {
            let store = open_store(&args.data_dir)?;
            let config = RunConfig {
                device_key: device,
                script,
                mode: mode.into(),
                required_features: required,
                optional_features: optional,
                fps,
                max_frames: frames,
                origin,
            };

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(run::run(config, Box::new(store)))?;
        }
        Command::Settings { action } => {
            let mut store = open_store(&args.data_dir)?;
            match action {
                SettingsCommand::Show => {
                    let settings = EmulatorSettings::load(&store);
                    println!("{}", serde_json::to_string_pretty(&settings)?);
                }
                SettingsCommand::Reset => {
                    EmulatorSettings::clear(&mut store)?;
                    println!("Settings reset in {}", store.path().display());
                }
            }
        }
    }

    Ok(())
}
