use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use bpla_tracker::config::{DEFAULT_CONFIG_FILE, TrackerConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "bpla-tracker")]
#[command(version, about = "Assembly tracker for UAV production")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (permissive CORS for a local frontend dev server)
        #[arg(long)]
        dev: bool,

        /// Open the browser once the server is listening
        #[arg(long)]
        open: bool,
    },
    /// Write a default config file and create the database and data directories
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Load the built-in blueprints for the legacy UAV types
    Seed,
    /// Create a user account
    CreateUser {
        #[arg(long)]
        login: String,

        #[arg(long)]
        full_name: String,

        /// Role name, e.g. "Цех" or "Администратор"
        #[arg(long)]
        role: String,

        #[arg(long, env = "BPLA_USER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Print a bcrypt hash for a password
    HashPassword { password: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Hashing needs neither config nor logging.
    if let Commands::HashPassword { password } = &cli.command {
        return cmd::cmd_hash_password(password);
    }
    if let Commands::Init { force } = &cli.command {
        return cmd::cmd_init(&cli.config, *force);
    }

    let mut config = TrackerConfig::resolve(&cli.config)?;
    let _log_guard = bpla_tracker::logging::init(&config.logging)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            dev,
            open,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.server.dev_mode |= dev;
            cmd::cmd_serve(config, open).await?;
        }
        Commands::Seed => cmd::cmd_seed(&config)?,
        Commands::CreateUser {
            login,
            full_name,
            role,
            password,
        } => cmd::cmd_create_user(&config, &login, &full_name, &role, &password)?,
        Commands::Init { .. } | Commands::HashPassword { .. } => {}
    }

    Ok(())
}
