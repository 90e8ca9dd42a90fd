/// Strata - declarative AWS network and EKS deployment plans
///
/// Evaluates a per-environment configuration table once and writes the
/// resulting deployment plans as JSON for an external provisioning engine
/// to reconcile. There is no runtime component here: apply, diff, retries
/// and eventual consistency all belong to the engine.
mod config;
mod eks;
mod network;
mod plan;
mod stack;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DeployConfig;
use crate::stack::{synthesize_all, synthesize_environment, EnvironmentPlans};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Synthesize AWS network and EKS deployment plans", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to the built-in environment table)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for synthesized plans
    #[arg(short, long, default_value = "./output")]
    output: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the configuration and write plan documents
    Synth {
        /// Restrict synthesis to one environment
        #[arg(long)]
        env: Option<String>,
    },

    /// Check the configuration and plan integrity without writing files
    Validate,

    /// Show the naming/value store entries each environment publishes
    Params {
        /// Restrict to one environment
        #[arg(long)]
        env: Option<String>,
    },

    /// Generate an example configuration file
    Init,
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("strata={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Synth { ref env } => synth(&cli, env.as_deref()),
        Commands::Validate => validate(&cli),
        Commands::Params { ref env } => params(&cli, env.as_deref()),
        Commands::Init => init_config(&cli),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Load the configuration from the given file or fall back to the
/// built-in environment table
fn load_config(cli: &Cli) -> Result<DeployConfig> {
    match &cli.config {
        Some(path) => DeployConfig::from_file(path).context("Failed to load configuration"),
        None => {
            let config = DeployConfig::builtin();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Evaluate the selected environments, in declaration order
fn evaluate(config: &DeployConfig, only: Option<&str>) -> Result<Vec<EnvironmentPlans>> {
    if let Some(name) = only {
        let env = config
            .environments
            .get(name)
            .with_context(|| format!("unknown environment: {}", name))?;
        return Ok(vec![synthesize_environment(
            name,
            env,
            &config.region,
            &config.alb_policy_path,
        )?]);
    }

    synthesize_all(config)
}

/// Evaluate and write plan documents
fn synth(cli: &Cli, only: Option<&str>) -> Result<()> {
    let config = load_config(cli)?;

    info!("Synthesizing plans for region {}", config.region);

    let environments = evaluate(&config, only)?;
    for env in &environments {
        let dir = cli.output.join(&env.env_name);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        let network_path = dir.join("network.json");
        std::fs::write(&network_path, env.network.to_json()?)
            .with_context(|| format!("Failed to write {}", network_path.display()))?;

        let cluster_path = dir.join("cluster.json");
        std::fs::write(&cluster_path, env.cluster.to_json()?)
            .with_context(|| format!("Failed to write {}", cluster_path.display()))?;

        info!(
            "  {}: {} + {} resources -> {}",
            env.env_name,
            env.network.len(),
            env.cluster.len(),
            dir.display()
        );
    }

    info!("✓ Synthesized {} environment(s)", environments.len());
    info!("");
    info!("Next steps:");
    info!("  Hand the plan documents under {} to the", cli.output.display());
    info!("  provisioning engine, network plan before cluster plan.");

    Ok(())
}

/// Evaluate everything but write nothing
fn validate(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let environments = evaluate(&config, None)?;

    info!(
        "✓ Configuration valid: {} environment(s), region {}",
        environments.len(),
        config.region
    );

    Ok(())
}

/// Show the published naming/value store entries
fn params(cli: &Cli, only: Option<&str>) -> Result<()> {
    let config = load_config(cli)?;

    for env in evaluate(&config, only)? {
        info!("Environment: {}", env.env_name);
        for (key, value) in env.store.entries() {
            info!("  {} = {}", key, value);
        }
    }

    Ok(())
}

/// Write an example configuration file
fn init_config(cli: &Cli) -> Result<()> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("environments.yaml"));

    if path.exists() {
        anyhow::bail!("Configuration file already exists: {}", path.display());
    }

    let example = DeployConfig::example();
    let yaml = serde_yaml::to_string(&example)?;
    std::fs::write(&path, yaml)
        .with_context(|| format!("Failed to write configuration file {}", path.display()))?;

    info!("Example configuration created: {}", path.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the environment table to match your address plan");
    info!("  2. Place the controller policy document at policies/alb-iam-policy.json");
    info!("  3. Synthesize the plans:");
    info!("     strata synth");

    Ok(())
}
