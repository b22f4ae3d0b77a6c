//! Crane - Docker Swarm stack management
//!
//! This is the main CLI entry point for Crane.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crane::auth::{self, Authenticator};
use crane::cluster::{ClusterClient, DockerCluster, MemoryCluster};
use crane::config::{CraneConfig, Endpoint, FEATURE_ACCOUNT};
use crane::context::RequestContext;
use crane::daemon::{ApiHandler, CraneDaemon};
use crane::stack::{DeployOptions, PermissionGrant, StackBundle, StackOrchestrator};
use crane::swarm::{validate_service_spec, ServiceSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Crane - Docker Swarm stack management
#[derive(Parser)]
#[command(name = "crane")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Validate, deploy and manage Docker Swarm stacks", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Swarm manager endpoint (overrides CRANE_SWARM_MANAGER_IP)
    #[arg(long, global = true)]
    manager: Option<String>,

    /// Run against an in-memory cluster instead of a manager
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the REST API server
    Serve {
        /// Listen address (overrides CRANE_ADDR)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Manage stacks
    Stack {
        #[command(subcommand)]
        command: StackCommands,
    },

    /// Validate a service spec file
    Validate {
        /// JSON or YAML service spec
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum StackCommands {
    /// Deploy a stack bundle
    Deploy {
        /// JSON or YAML bundle
        #[arg(short, long)]
        file: PathBuf,
        /// Group owning the stack (account mode)
        #[arg(long)]
        group_id: Option<u64>,
    },

    /// List stacks
    #[command(alias = "list")]
    Ls,

    /// Show the bundle of a deployed stack
    Inspect {
        namespace: String,
    },

    /// List the services of a stack
    Services {
        namespace: String,
    },

    /// Remove a stack
    #[command(alias = "remove")]
    Rm {
        namespace: String,
    },

    /// Scale a stack service (SERVICE=REPLICAS)
    Scale {
        namespace: String,
        target: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = CraneConfig::from_env().context("invalid configuration")?;
    if let Some(manager) = &cli.manager {
        config.swarm_manager = Endpoint::parse(manager)?;
    }

    if let Commands::Validate { file } = &cli.command {
        return validate_file(file);
    }

    if cli.dry_run {
        tracing::info!("Dry run: using an in-memory cluster");
        run(cli, config, Arc::new(MemoryCluster::single_node())).await
    } else {
        let client = DockerCluster::from_config(&config)?;
        run(cli, config, Arc::new(client)).await
    }
}

async fn run<C: ClusterClient + 'static>(
    cli: Cli,
    mut config: CraneConfig,
    client: Arc<C>,
) -> anyhow::Result<()> {
    let authenticator = auth::from_config(&config)?;
    let orchestrator = Arc::new(
        StackOrchestrator::new(client).with_account_mode(config.feature_enabled(FEATURE_ACCOUNT)),
    );
    let ctx = RequestContext::with_timeout(config.request_timeout);

    match cli.command {
        Commands::Serve { addr } => {
            if let Some(addr) = addr {
                config.addr = addr;
            }

            if orchestrator.account_mode() {
                let groups = authenticator.groups()?;
                tracing::info!("Account mode on, {} groups known", groups.len());
            }

            let handler = ApiHandler::new(orchestrator, authenticator, config.request_timeout);
            let daemon = CraneDaemon::new(&config.addr, handler);

            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutting down");
                    signal.cancel();
                }
            });

            daemon.run(shutdown).await?;
        }

        Commands::Stack { command } => {
            stack_command(command, &orchestrator, authenticator.as_ref(), &ctx).await?
        }

        Commands::Validate { file } => validate_file(&file)?,
    }

    Ok(())
}

async fn stack_command<C: ClusterClient>(
    command: StackCommands,
    orchestrator: &StackOrchestrator<C>,
    authenticator: &dyn Authenticator,
    ctx: &RequestContext,
) -> anyhow::Result<()> {
    match command {
        StackCommands::Deploy { file, group_id } => {
            let bundle = StackBundle::from_file(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;

            if let Some(id) = group_id {
                authenticator.group(id)?;
            }
            let options = DeployOptions {
                grant: group_id.map(PermissionGrant::admin),
                ..Default::default()
            };

            let report = orchestrator.deploy(ctx, &bundle, &options).await?;
            for name in &report.created {
                println!("Creating service {}", name);
            }
            for name in &report.updated {
                println!("Updating service {}", name);
            }
        }

        StackCommands::Ls => {
            let stacks = orchestrator.list(ctx).await?;
            println!(
                "{:<24} {:<10} {:<14} {:<8}",
                "NAME", "SERVICES", "TASKS", "GROUP"
            );
            for s in stacks {
                println!(
                    "{:<24} {:<10} {:<14} {:<8}",
                    s.namespace,
                    s.service_count,
                    format!("{}/{}", s.running_task_count, s.task_count),
                    s.group_id.map(|g| g.to_string()).unwrap_or_else(|| "-".to_string())
                );
            }
        }

        StackCommands::Inspect { namespace } => {
            let bundle = orchestrator.inspect(ctx, &namespace).await?;
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }

        StackCommands::Services { namespace } => {
            let services = orchestrator.list_stack_services(ctx, &namespace).await?;
            println!(
                "{:<14} {:<30} {:<10} {:<30}",
                "ID", "NAME", "REPLICAS", "IMAGE"
            );
            for s in services {
                let replicas = match s.replicas {
                    Some(n) => format!("{}/{}", s.running_tasks, n),
                    None => format!("{} (global)", s.running_tasks),
                };
                println!(
                    "{:<14} {:<30} {:<10} {:<30}",
                    s.id.chars().take(12).collect::<String>(),
                    s.name,
                    replicas,
                    s.image.unwrap_or_default()
                );
            }
        }

        StackCommands::Rm { namespace } => {
            let report = orchestrator.remove(ctx, &namespace).await?;
            for name in &report.removed {
                println!("Removing service {}", name);
            }
        }

        StackCommands::Scale { namespace, target } => {
            let Some((service, replicas)) = target.split_once('=') else {
                bail!("invalid scale target {}: expected SERVICE=REPLICAS", target);
            };
            let replicas: u64 = replicas
                .parse()
                .with_context(|| format!("invalid replica count: {}", replicas))?;

            orchestrator
                .scale_service(ctx, &namespace, service, replicas)
                .await?;
            println!("{}_{} scaled to {}", namespace, service, replicas);
        }
    }

    Ok(())
}

fn validate_file(path: &Path) -> anyhow::Result<()> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let spec: ServiceSpec = match path.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => serde_yaml::from_str(&data)?,
        _ => serde_json::from_str(&data)?,
    };

    validate_service_spec(Some(&spec))?;
    println!("{}: valid", path.display());
    Ok(())
}
