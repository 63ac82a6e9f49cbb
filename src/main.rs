use clap::{Parser, Subcommand};

mod app;
mod auth;
mod config;
mod cors;
mod db;
mod error;
mod expense;
mod forms;
mod income;
mod ledger;
mod receipts;
mod serde_ext;
mod state;
mod storage;
#[cfg(test)]
mod test_support;
mod validation;

use crate::{config::AppConfig, state::AppState};

#[derive(Debug, Parser)]
#[command(name = "pennywise", version, about = "Personal finance tracking API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve {
        /// Apply pending migrations before verifying the schema.
        #[arg(long)]
        migrate: bool,
    },
    /// Apply pending migrations and exit.
    Migrate,
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "pennywise=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let pool = db::connect(&config).await?;

    match cli.command.unwrap_or(Command::Serve { migrate: false }) {
        Command::Migrate => db::migrate(&pool).await,
        Command::Serve { migrate } => {
            if migrate || config.run_migrations {
                db::migrate(&pool).await?;
            }
            db::verify_schema(&pool).await?;

            let (host, port) = (config.host.clone(), config.port);
            let state = AppState::init(config, pool).await?;
            let app = app::build_app(state)?;
            app::serve(app, &host, port).await
        }
    }
}
