//! lookout: follow presence and notice channels from the terminal.

mod cli;
mod feed;
mod settings;
mod view;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use lookout_config::LookoutConfig;
use lookout_realtime::{BroadcastClient, LocalBroadcast, RealtimeClient};
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::cli::Command;
use crate::feed::FeedTarget;

const DEFAULT_LOG_DIRECTIVE: &str = "lookout=info";

type LogHandle = reload::Handle<EnvFilter, Registry>;

fn env_filter(level: &str) -> EnvFilter {
    let directive: Directive = level.parse().unwrap_or_else(|_| {
        eprintln!("invalid log directive {level:?}, using {DEFAULT_LOG_DIRECTIVE}");
        DEFAULT_LOG_DIRECTIVE
            .parse()
            .unwrap_or_else(|_| LevelFilter::INFO.into())
    });
    EnvFilter::from_default_env().add_directive(directive)
}

/// Install the global subscriber. The returned handle swaps the filter once
/// the config file has been read.
fn init_logging(level: &str) -> LogHandle {
    let (filter, handle) = reload::Layer::new(env_filter(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    handle
}

/// Read the config file, apply flag overrides, then validate the result.
fn load(args: &cli::Args) -> lookout_common::Result<LookoutConfig> {
    let mut config = lookout_config::read_config(args.config.as_deref())?;
    args.apply_to(&mut config);
    lookout_config::validation::validate(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    let log_handle = init_logging(args.log_level.as_deref().unwrap_or(DEFAULT_LOG_DIRECTIVE));

    tracing::info!("lookout v{} starting", env!("CARGO_PKG_VERSION"));
    let config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Config load failed");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = log_handle.reload(env_filter(&config.logging.level)) {
        tracing::warn!(error = %e, "Could not apply configured log level");
    }
    tracing::debug!(config = %lookout_config::config_to_json(&config), "Effective config");

    let feed_target = match &args.command {
        Command::Who { .. } => FeedTarget {
            channel: config.presence.channel.clone(),
            event: None,
        },
        Command::Notices { .. } => FeedTarget {
            channel: config.notices.channel.clone(),
            event: Some(config.notices.event.clone()),
        },
    };

    let mut realtime = None;
    let client: Arc<dyn BroadcastClient> = if args.local {
        let local = LocalBroadcast::new();
        tokio::spawn(feed::run(local.clone(), feed_target));
        Arc::new(local)
    } else {
        let rt_config = match settings::realtime_config(&config) {
            Ok(rt_config) => rt_config,
            Err(e) => {
                tracing::error!(error = %e, "Realtime settings incomplete");
                return ExitCode::FAILURE;
            }
        };
        let rt = Arc::new(RealtimeClient::connect(rt_config));
        realtime = Some(Arc::clone(&rt));
        rt
    };

    match &args.command {
        Command::Who { .. } => view::who(client, &config.presence.channel).await,
        Command::Notices { .. } => {
            view::notices(
                client,
                &config.notices.channel,
                &config.notices.event,
                Duration::from_secs(config.notices.display_secs),
            )
            .await
        }
    }

    if let Some(rt) = realtime {
        rt.disconnect().await;
        // Give the connection task a moment to send the leave frames.
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
