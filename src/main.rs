//! Voyager Link - command line client
//!
//! `tail` opens a managed connection and logs every event until Ctrl-C or
//! until reconnection gives up. `config` validates a configuration file.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info, warn};
use voyager_link::observability::init_default_logging;
use voyager_link::{ClientConfig, ConnectionStatus, EventType, LifecycleEvent, RealtimeClient};

/// Persistent real-time connection client for the Voyager platform
#[derive(Parser)]
#[command(name = "voyager-link")]
#[command(about = "Persistent real-time connection client for the Voyager platform")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and log every event until interrupted
    Tail {
        /// Endpoint URL, overrides the configuration file
        #[arg(long)]
        url: Option<String>,
        /// Credential token, overrides the configuration file
        #[arg(long, env = "VOYAGER_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Session to resume
        #[arg(long)]
        session_id: Option<String>,
        /// Channel to join; repeatable
        #[arg(long = "channel")]
        channels: Vec<String>,
        /// Log every frame at debug level
        #[arg(long)]
        debug: bool,
    },
    /// Validate the configuration
    Config {
        /// Print the resolved configuration (token redacted)
        #[arg(long)]
        show: bool,
    },
}

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["voyager-link.toml", "config/voyager-link.toml"];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting voyager-link v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Tail {
            url,
            token,
            session_id,
            channels,
            debug,
        } => match build_tail_config(cli.config.as_deref(), url, token, session_id, channels, debug)
        {
            Ok(config) => tail(config).await,
            Err(e) => Err(e),
        },
        Commands::Config { show } => handle_config_command(cli.config.as_deref(), show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

fn load_configuration(explicit: Option<&Path>) -> Result<Option<ClientConfig>, Box<dyn std::error::Error>> {
    match find_config_file(explicit) {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(Some(ClientConfig::load_from_file(&path)?))
        }
        None => Ok(None),
    }
}

fn build_tail_config(
    explicit: Option<&Path>,
    url: Option<String>,
    token: Option<String>,
    session_id: Option<String>,
    channels: Vec<String>,
    debug: bool,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match (load_configuration(explicit)?, url) {
        (Some(mut config), url) => {
            if let Some(url) = url {
                config.url = url;
            }
            config
        }
        (None, Some(url)) => ClientConfig::new(url, String::new()),
        (None, None) => {
            return Err(
                "no configuration file found; pass --config or --url (see voyager-link.toml)".into(),
            )
        }
    };

    if let Some(token) = token {
        config.token = token;
    }
    if session_id.is_some() {
        config.session_id = session_id;
    }
    if !channels.is_empty() {
        config.channels = channels;
    }
    config.debug |= debug;
    config.validate()?;
    Ok(config)
}

async fn tail(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = RealtimeClient::websocket(config)?;

    for event_type in EventType::ALL {
        client.on(event_type, |event| {
            info!(
                event_type = %event.event_type,
                event_id = %event.id,
                payload = %serde_json::Value::Object(event.payload.clone()),
                "Event"
            );
            Ok(())
        });
    }

    let mut lifecycle = client.lifecycle();
    tokio::spawn(async move {
        while let Ok(event) = lifecycle.recv().await {
            match event {
                LifecycleEvent::Connected { connection_id, .. } => {
                    info!(connection_id = %connection_id, "Connected")
                }
                LifecycleEvent::ReconnectScheduled {
                    attempt,
                    max_attempts,
                    delay_ms,
                } => warn!(attempt, max_attempts, delay_ms, "Reconnect scheduled"),
                other => info!(event = ?other, "Lifecycle"),
            }
        }
    });

    if let Err(e) = client.connect().await {
        warn!("Initial connection failed: {}", e);
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
        }
        _ = wait_for_permanent_failure(&client) => {
            error!("Reconnection gave up, shutting down");
        }
    }

    client.destroy().await;
    println!("{}", serde_json::to_string_pretty(&client.stats())?);
    Ok(())
}

/// Resolves once the client settles in ERROR with no reconnect pending
async fn wait_for_permanent_failure(client: &RealtimeClient) {
    let mut state = client.watch_state();
    // The sender lives until the client is destroyed
    let _ = state
        .wait_for(|s| s.status == ConnectionStatus::Error)
        .await;
}

fn handle_config_command(
    explicit: Option<&Path>,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(mut config) = load_configuration(explicit)? else {
        return Err("no configuration file found; pass --config".into());
    };

    if show {
        if !config.token.is_empty() {
            config.token = "***".to_string();
        }
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
