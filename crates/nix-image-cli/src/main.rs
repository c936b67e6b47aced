//! nix-image - docker:nix image builder CLI
//!
//! Builds a test plan's Nix flake image, loads it into the local Docker
//! daemon and tags it for the plan.
//!
//! ## Commands
//!
//! - `build`: run the full build → load → identify → tag pipeline
//! - `purge`: remove plan artifacts (not supported by docker:nix)
//! - `config`: print the default builder configuration as JSON

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nix_image_builder::{
    init_tracing, BuildConfig, BuildInput, Builder, BuilderSettings, CancelSignal, DockerCli,
    DockerNixBuilder, DockerNixConfig, LoadStrategy, NixCli, TracingSink,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "nix-image")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build Nix flake images into Docker (docker:nix builder)", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a plan's image and load it into Docker
    Build {
        /// Test plan name
        #[arg(short, long)]
        plan: String,

        /// Plan source directory containing the flake (default: current directory)
        #[arg(short, long, default_value = ".")]
        source: PathBuf,

        /// Builder configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Flake attribute to build (default: <plan>-image)
        #[arg(long)]
        name: Option<String>,

        /// Nix system, e.g. x86_64-linux (default: derived from the host CPU)
        #[arg(long)]
        system: Option<String>,

        /// Maximum load attempts
        #[arg(long)]
        attempts: Option<u32>,

        /// Delay between load attempts in milliseconds
        #[arg(long)]
        retry_delay_ms: Option<u64>,

        /// Wait this long once, then load a single time (overrides retries)
        #[arg(long)]
        pre_delay_ms: Option<u64>,
    },

    /// Remove artifacts built for a plan
    Purge {
        /// Test plan name
        #[arg(short, long)]
        plan: String,
    },

    /// Print the default builder configuration
    Config,
}

/// Load-related flag overrides for the `build` command.
#[derive(Debug, Default, Clone, Copy)]
struct LoadOverrides {
    attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
    pre_delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let settings = BuilderSettings::from_env();

    match cli.command {
        Commands::Build {
            plan,
            source,
            config,
            name,
            system,
            attempts,
            retry_delay_ms,
            pre_delay_ms,
        } => {
            let overrides = LoadOverrides {
                attempts,
                retry_delay_ms,
                pre_delay_ms,
            };
            cmd_build(
                apply_load_overrides(settings, overrides),
                &plan,
                &source,
                config.as_deref(),
                name,
                system,
            )
            .await
        }
        Commands::Purge { plan } => cmd_purge(settings, &plan).await,
        Commands::Config => cmd_config(),
    }
}

fn make_builder(settings: &BuilderSettings) -> DockerNixBuilder {
    DockerNixBuilder::new(
        Arc::new(NixCli::new(settings.nix_program.clone())),
        Arc::new(DockerCli::new(settings.docker_program.clone())),
        settings,
    )
}

/// Cancel the returned signal on Ctrl+C or SIGTERM.
fn cancel_on_signal() -> CancelSignal {
    let cancel = CancelSignal::new();
    let trigger = cancel.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT (Ctrl+C), cancelling build"),
            _ = terminate => info!("Received SIGTERM, cancelling build"),
        }

        trigger.cancel();
    });

    cancel
}

fn apply_load_overrides(mut settings: BuilderSettings, overrides: LoadOverrides) -> BuilderSettings {
    if let Some(delay_ms) = overrides.pre_delay_ms {
        settings.load = LoadStrategy::PreDelay { delay_ms };
        return settings;
    }

    if overrides.attempts.is_some() || overrides.retry_delay_ms.is_some() {
        let (attempts, delay_ms) = match settings.load {
            LoadStrategy::Retry { attempts, delay_ms } => (attempts, delay_ms),
            LoadStrategy::PreDelay { .. } => {
                let default = LoadStrategy::default();
                (default.max_attempts(), default.delay().as_millis() as u64)
            }
        };
        settings.load = LoadStrategy::Retry {
            attempts: overrides.attempts.unwrap_or(attempts),
            delay_ms: overrides.retry_delay_ms.unwrap_or(delay_ms),
        };
    }

    settings
}

/// Resolve the configuration record the builder will receive.
fn load_build_config(
    builder: &dyn Builder,
    path: Option<&Path>,
    name: Option<String>,
    system: Option<String>,
) -> Result<BuildConfig> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            let raw: serde_json::Value = serde_json::from_slice(&content)
                .with_context(|| format!("Failed to parse config file {:?} as JSON", path))?;
            builder
                .decode_config(raw)
                .with_context(|| format!("Invalid builder configuration in {:?}", path))?
        }
        None => BuildConfig::DockerNix(DockerNixConfig {
            enabled: true,
            ..Default::default()
        }),
    };

    if let BuildConfig::DockerNix(cfg) = &mut config {
        if !cfg.enabled {
            bail!("docker:nix builder is disabled in this configuration (enabled = false)");
        }
        if name.is_some() {
            cfg.name = name;
        }
        if system.is_some() {
            cfg.system = system;
        }
    }

    Ok(config)
}

async fn cmd_build(
    settings: BuilderSettings,
    plan: &str,
    source: &Path,
    config_path: Option<&Path>,
    name: Option<String>,
    system: Option<String>,
) -> Result<()> {
    let builder = make_builder(&settings);
    let config = load_build_config(&builder, config_path, name, system)?;
    let source_dir = std::fs::canonicalize(source)
        .with_context(|| format!("Plan source directory {:?} not found", source))?;

    let input = BuildInput {
        plan: plan.to_string(),
        source_dir,
        config,
    };
    let cancel = cancel_on_signal();

    match builder.build(&cancel, &input, &TracingSink).await {
        Ok(output) => {
            println!("{}", output.artifact_id);
            Ok(())
        }
        Err(err) => {
            // A tag failure still produced a usable image.
            if let Some(output) = err.partial_output() {
                println!("{}", output.artifact_id);
            }
            Err(err).context(format!("Build of plan '{}' failed", plan))
        }
    }
}

async fn cmd_purge(settings: BuilderSettings, plan: &str) -> Result<()> {
    let builder = make_builder(&settings);
    builder
        .purge(&CancelSignal::new(), plan, &TracingSink)
        .await
        .with_context(|| format!("Purge of plan '{}' failed", plan))
}

fn cmd_config() -> Result<()> {
    let mut shape = serde_json::to_value(DockerNixConfig {
        enabled: true,
        ..Default::default()
    })?;
    if let Some(object) = shape.as_object_mut() {
        object.insert(
            "builder".to_string(),
            serde_json::Value::String(DockerNixBuilder::ID.to_string()),
        );
    }
    println!("{}", serde_json::to_string_pretty(&shape)?);
    Ok(())
}
