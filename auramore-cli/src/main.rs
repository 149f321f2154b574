//! auramore: install, trust and run mods from the command line

use anyhow::Result;
use auramore_host::Permission;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;
mod logging;
mod pack;

use commands::Context;
use logging::{LogConfig, LogFormat};

/// Mod host for the desktop shell
#[derive(Parser)]
#[command(name = "auramore", version)]
#[command(about = "Install, trust and run auramore mods", long_about = None)]
struct Cli {
    /// Data root holding installed mods
    #[arg(long, global = true, env = "AURAMORE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Settings file
    #[arg(long, global = true, env = "AURAMORE_SETTINGS")]
    settings: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List installed mods
    List {
        #[arg(long)]
        json: bool,
    },

    /// Install or update a mod package
    Install {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Uninstall a mod (succeeds for unknown ids)
    Uninstall { id: String },

    /// Enable or disable a mod
    Toggle { id: String, state: Switch },

    /// Show manifest and status of a mod
    Info {
        id: String,
        #[arg(long)]
        json: bool,
    },

    /// Interface zoom preference
    Zoom {
        #[command(subcommand)]
        action: ZoomAction,
    },

    /// Trust policy settings
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Run enabled mods until Ctrl-C
    Run,

    /// Build a package from a mod directory
    Pack {
        dir: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// File holding a base64 secret key from `keygen`
        #[arg(long, requires = "key_id")]
        sign_key: Option<PathBuf>,
        /// Key id recorded in the signature
        #[arg(long, requires = "sign_key")]
        key_id: Option<String>,
    },

    /// Generate a publisher key pair
    Keygen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn is_on(self) -> bool {
        self == Switch::On
    }
}

#[derive(Subcommand)]
enum ZoomAction {
    Get,
    /// Set the zoom factor (0.5 to 2.0)
    Set { scale: f64 },
}

#[derive(Subcommand)]
enum PolicyAction {
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Require verified signatures
    Strict { state: Switch },
    /// Allow a permission
    Allow { permission: Permission },
    /// Deny a permission
    Deny { permission: Permission },
    /// Trust a publisher key
    Trust { key_id: String, public_key: String },
    /// Remove a trusted key
    Untrust { key_id: String },
}

fn log_level(verbose: u8) -> Option<tracing::Level> {
    match verbose {
        0 => None,
        1 => Some(tracing::Level::DEBUG),
        _ => Some(tracing::Level::TRACE),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&LogConfig {
        format: cli.log_format,
        level: log_level(cli.verbose),
        ..Default::default()
    });

    match cli.command {
        Command::Pack {
            dir,
            output,
            sign_key,
            key_id,
        } => {
            let signer = key_id.as_deref().zip(sign_key.as_deref());
            return commands::pack(&dir, &output, signer);
        }
        Command::Keygen => {
            commands::keygen();
            return Ok(());
        }
        _ => {}
    }

    let mut ctx = Context::load(cli.settings, cli.data_dir)?;

    match cli.command {
        Command::List { json } => commands::list(&ctx, json),
        Command::Install { path, json } => commands::install(&ctx, &path, json).await,
        Command::Uninstall { id } => commands::uninstall(&ctx, &id).await,
        Command::Toggle { id, state } => commands::toggle(&ctx, &id, state.is_on()).await,
        Command::Info { id, json } => commands::info(&ctx, &id, json),
        Command::Zoom { action } => match action {
            ZoomAction::Get => {
                commands::zoom_get(&ctx);
                Ok(())
            }
            ZoomAction::Set { scale } => commands::zoom_set(&mut ctx, scale),
        },
        Command::Policy { action } => match action {
            PolicyAction::Show { json } => commands::policy_show(&ctx, json),
            PolicyAction::Strict { state } => commands::policy_strict(&mut ctx, state.is_on()),
            PolicyAction::Allow { permission } => commands::policy_allow(&mut ctx, permission, true),
            PolicyAction::Deny { permission } => commands::policy_allow(&mut ctx, permission, false),
            PolicyAction::Trust { key_id, public_key } => {
                commands::policy_trust(&mut ctx, &key_id, Some(&public_key))
            }
            PolicyAction::Untrust { key_id } => commands::policy_trust(&mut ctx, &key_id, None),
        },
        Command::Run => commands::run(&ctx).await,
        Command::Pack { .. } | Command::Keygen => Ok(()),
    }
}
