use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keel::api::{self, middleware::SecurityConfig};
use keel::config::Config;
use keel_core::models::*;
use keel_core::Keel;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Versioned project artifacts, phase workflow and audit trail")]
struct Cli {
    /// Data directory (overrides KEEL_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Name recorded on commits and audit events
    #[arg(long, global = true, env = "KEEL_ACTOR", default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Port for HTTP API (overrides KEEL_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create, list or show projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Show a project's workflow state and allowed transitions
    State { key: String },
    /// Move a project to another workflow state
    Transition {
        key: String,
        /// Target state (initiating, planning, executing, monitoring, closing, closed)
        to: String,
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Show a project's audit trail, newest first
    Audit {
        key: String,
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Only events of this type
        #[arg(short = 't', long)]
        event_type: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    Create {
        key: String,
        name: String,
        /// predictive, agile or hybrid
        #[arg(short, long, default_value = "predictive")]
        methodology: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    List,
    Show { key: String },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "keel=debug,keel_core=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = Config::from_env()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    let keel = Keel::open(config.keel_config())
        .with_context(|| format!("Failed to open data directory {}", config.data_dir.display()))?;
    let actor = Actor::new(cli.actor);

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.port);
            tracing::info!("Starting keel server on port {}", port);

            let app = api::create_router(keel, SecurityConfig::from_config(&config));

            let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
            tracing::info!("keel server listening on http://127.0.0.1:{}", port);

            axum::serve(listener, app).await?;
        }
        Commands::Project { command } => match command {
            ProjectCommands::Create {
                key,
                name,
                methodology,
                description,
            } => {
                let input = CreateProjectInput {
                    key,
                    name,
                    methodology: Methodology::parse(&methodology)?,
                    description,
                };
                print_json(&keel.projects().create(input, &actor)?)?;
            }
            ProjectCommands::List => {
                for project in keel.projects().list()? {
                    println!(
                        "{:<16} {:<10} {}",
                        project.key,
                        project.methodology.as_str(),
                        project.name
                    );
                }
            }
            ProjectCommands::Show { key } => print_json(&keel.projects().get(&key)?)?,
        },
        Commands::State { key } => {
            let record = keel.workflow().record(&key)?;
            println!("{}: {}", key, record.state);
            let allowed: Vec<&str> = record.state.successors().iter().map(|s| s.as_str()).collect();
            if allowed.is_empty() {
                println!("terminal state, no further transitions");
            } else {
                println!("allowed: {}", allowed.join(", "));
            }
        }
        Commands::Transition { key, to, reason } => {
            let to = WorkflowState::parse(&to)?;
            let record = keel.workflow().transition(&key, to, &actor, reason)?;
            println!("{}: {} -> {}", key, record.previous.map(|s| s.as_str()).unwrap_or("-"), record.state);
        }
        Commands::Audit {
            key,
            limit,
            event_type,
        } => {
            let filter = AuditFilter {
                event_type: event_type.as_deref().map(AuditEventType::parse).transpose()?,
                ..Default::default()
            };
            for event in keel.audit_query(&key, &filter, limit, 0)? {
                println!(
                    "{}  {:<24} {:<12} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type.as_str(),
                    event.actor,
                    event.payload_summary
                );
            }
        }
    }

    Ok(())
}
