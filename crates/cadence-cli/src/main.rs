use clap::{Parser, Subcommand};
use tracing::info;

mod demo;

/// Cadence job scheduler
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(about = "In-process job scheduler demos")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.cadence/cadence.toml)
    #[arg(long, env = "CADENCE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scripted scenario and print the resulting jobs as JSON
    Demo {
        #[command(subcommand)]
        scenario: demo::Scenario,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // config before logging: the filter comes from it unless RUST_LOG is set
    let config = cadence_core::CadenceConfig::load(cli.config.as_deref());
    let filter = config
        .as_ref()
        .map(|c| c.logging.filter.clone())
        .unwrap_or_else(|_| cadence_core::config::DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    let config = config.unwrap_or_else(|e| {
        tracing::warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        cadence_core::CadenceConfig::default()
    });

    match cli.command {
        Some(Commands::Demo { scenario }) => {
            info!(?scenario, "running demo");
            let jobs = demo::run(scenario, config.scheduler).await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
            Ok(())
        }
        Some(Commands::Config) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
