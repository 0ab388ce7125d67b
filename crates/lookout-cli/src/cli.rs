use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lookout_config::LookoutConfig;

/// Lookout: watch who is online and show broadcast notices.
#[derive(Parser, Debug)]
#[command(name = "lookout", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log filter directive override, e.g. `lookout=debug`.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Use an in-process channel fed from stdin instead of the server.
    #[arg(long)]
    pub local: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Follow the members present on a channel.
    Who {
        /// Presence channel name.
        #[arg(long)]
        channel: Option<String>,
    },
    /// Show the latest notice broadcast on a channel.
    Notices {
        #[arg(long)]
        channel: Option<String>,

        /// Broadcast event name.
        #[arg(long)]
        event: Option<String>,

        /// Seconds a notice stays visible.
        #[arg(long)]
        display_secs: Option<u64>,
    },
}

impl Args {
    /// Apply command-line overrides on top of the file config.
    pub fn apply_to(&self, config: &mut LookoutConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        match &self.command {
            Command::Who { channel } => {
                if let Some(channel) = channel {
                    config.presence.channel = channel.clone();
                }
            }
            Command::Notices {
                channel,
                event,
                display_secs,
            } => {
                if let Some(channel) = channel {
                    config.notices.channel = channel.clone();
                }
                if let Some(event) = event {
                    config.notices.event = event.clone();
                }
                if let Some(secs) = display_secs {
                    config.notices.display_secs = *secs;
                }
            }
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}
