//! Command-line front end for shardkit. CLI argument parsing is outside
//! this crate's core design (its scope is the library), but an operator
//! still needs a way to sanity-check configuration, so `shardctl` keeps
//! that single responsibility rather than growing into a full client.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use shardkit_config::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shardctl", version, about = "shardkit operator CLI")]
struct Cli {
    /// Path to the configuration file. Default: "shardkit.toml"
    #[arg(short, long, default_value = "shardkit.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration file, then print it back out.
    Configcheck,

    /// Run a scripted end-to-end scenario against in-memory clusters, to
    /// sanity-check a build without a live database. Requires the
    /// `testing` feature.
    #[cfg(feature = "testing")]
    Demo,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Configcheck => match Config::load(&cli.config) {
            Ok(config) => {
                match config.to_toml_string() {
                    Ok(toml) => {
                        info!("{} is valid", cli.config.display());
                        println!("{toml}");
                        ExitCode::SUCCESS
                    }
                    Err(e) => {
                        error!(error = %e, "failed to serialize configuration");
                        ExitCode::FAILURE
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "failed to load configuration");
                ExitCode::FAILURE
            }
        },

        #[cfg(feature = "testing")]
        Command::Demo => {
            let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
            runtime.block_on(demo::run())
        }
    }
}

#[cfg(feature = "testing")]
mod demo {
    use std::sync::Arc;

    use shardkit::controller::Controller;
    use shardkit::db::{DbError, DocumentDatabase};
    use shardkit::testing::InMemoryDatabase;
    use shardkit::Location;
    use shardkit_config::Config;
    use std::process::ExitCode;
    use tracing::info;

    pub async fn run() -> ExitCode {
        let source = Arc::new(InMemoryDatabase::new());
        let controller_db = Arc::new(InMemoryDatabase::new());

        let connector: shardkit::pool::Connector = Arc::new(move |uri: &str| {
            let conn: Arc<dyn DocumentDatabase> = match uri {
                "mem://controller" => controller_db.clone(),
                "mem://cluster-a" => source.clone(),
                other => return Err(DbError::Operation(format!("unknown demo cluster {other}"))),
            };
            Ok(conn)
        });

        let mut config = Config::default();
        config.controller_uri = "mem://controller".into();

        let controller = match Controller::new(config, connector).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to start demo controller");
                return ExitCode::FAILURE;
            }
        };

        if let Err(e) = controller.ensure_cluster_exists("cluster-a", "mem://cluster-a").await {
            tracing::error!(error = %e, "ensure_cluster_exists failed");
            return ExitCode::FAILURE;
        }
        if let Err(e) = controller
            .ensure_realm_exists("users", "user_id", "users", Location::new("cluster-a", "app"))
            .await
        {
            tracing::error!(error = %e, "ensure_realm_exists failed");
            return ExitCode::FAILURE;
        }

        info!("demo controller is up: cluster-a registered, users realm ready");
        ExitCode::SUCCESS
    }
}
