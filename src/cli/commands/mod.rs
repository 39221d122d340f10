mod subcommands;


use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kalma")]
#[command(about = "Kalma integration bridge (OAuth, webhooks, outbound sends)")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to $KALMA_HOME/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Encode or inspect OAuth state values
    State {
        #[command(subcommand)]
        cmd: StateCommands,
    },
    /// List a user's stored connections
    Connections {
        /// Kalma user id
        user_id: String,
    },
    /// Send one message through the dispatcher
    Send {
        #[arg(long)]
        platform: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        text: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// Encode a state value for a user
    Encode {
        user_id: String,
        /// Bind the state to one platform
        #[arg(long)]
        platform: Option<String>,
    },
    /// Decode a state value
    Decode { state: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Load and validate the config, reporting empty credentials
    Check,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve { host, port } => {
            subcommands::serve(config_path, host, port).await?;
        }
        Commands::State { cmd } => match cmd {
            StateCommands::Encode { user_id, platform } => {
                println!("{}", subcommands::encode_state(&user_id, platform.as_deref())?);
            }
            StateCommands::Decode { state } => {
                println!("{}", subcommands::decode_state(&state)?);
            }
        },
        Commands::Connections { user_id } => {
            subcommands::connections(config_path, &user_id).await?;
        }
        Commands::Send {
            platform,
            to,
            text,
            user,
            subject,
        } => {
            let request = crate::send::SendRequest {
                platform,
                to,
                text,
                user_id: user,
                subject,
            };
            subcommands::send(config_path, &request).await?;
        }
        Commands::Config { cmd } => match cmd {
            ConfigCommands::Check => subcommands::config_check(config_path)?,
        },
    }

    Ok(())
}
