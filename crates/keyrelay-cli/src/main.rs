//! CLI entry point - the composition root.
//!
//! Command dispatch routes to the admin server bootstrap; all wiring happens
//! inside `keyrelay_axum::bootstrap`.

use clap::{Parser, Subcommand};

use keyrelay_axum::{start_server, ServerConfig};

#[derive(Parser)]
#[command(name = "keyrelay", about = "Multi-upstream AI API gateway core", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the admin API and the script hot-reload loop.
    Serve {
        /// HTTP port for the admin API.
        #[arg(long)]
        port: Option<u16>,
        /// SQLite database URL (e.g. sqlite:keyrelay.db).
        #[arg(long)]
        database_url: Option<String>,
        /// Bearer token for the admin API.
        #[arg(long)]
        auth_token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Serve {
            port,
            database_url,
            auth_token,
        } => {
            let mut config = ServerConfig::from_env();
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(database_url) = database_url {
                config.database_url = database_url;
            }
            if let Some(auth_token) = auth_token {
                config.auth_token = Some(auth_token);
            }

            start_server(config).await?;
        }
    }

    Ok(())
}
