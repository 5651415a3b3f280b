use std::path::PathBuf;
use std::sync::Arc;

/// Reset SIGPIPE to default behavior so piping (e.g. `pgkeep show db | less`) exits
/// cleanly instead of panicking on broken pipe.
#[cfg(unix)]
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use pgkeep::config::parser::{load_settings, DEFAULT_CONFIG_FILE};
use pgkeep::config::types::Settings;
use pgkeep::executor::remote::{RemoteExec, SshExecutor};
use pgkeep::executor::retry::{with_retry, RetryPolicy};
use pgkeep::metrics::{MetricKind, MetricsQuery};
use pgkeep::output::formatter::{self, Owned};
use pgkeep::resource::descriptor::{
    destination_kind, Destination, ResourceDescriptor, Secret, Server, SslMode,
};
use pgkeep::resource::lifecycle::LifecycleCoordinator;
use pgkeep::resource::view::ResourceView;
use pgkeep::state::backend::{
    EnvironmentVariableStore, PersistentVolumeStore, ScheduledBackupStore, StateBackend,
    TagAssociationStore,
};
use pgkeep::state::models::{ResourceFilter, ScheduledBackup};
use pgkeep::state::sqlite::SqliteBackend;

/// pgkeep - state, drift and lifecycle of standalone PostgreSQL databases
#[derive(Parser)]
#[command(name = "pgkeep", version, about, long_about = None)]
struct Cli {
    /// Path to the settings file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Override the state database path from settings
    #[arg(long)]
    state: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the state database
    Init,

    /// Manage servers
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },

    /// Register a new database and provision its default volume
    Create(CreateArgs),

    /// List databases, or show one in detail
    Show {
        /// Database uuid (omit to list all)
        uuid: Option<String>,

        /// Include soft-deleted databases in the list
        #[arg(long)]
        all: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Read or record container status
    Status {
        #[command(subcommand)]
        command: StatusCommands,
    },

    /// Manage environment variables
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },

    /// Manage tags
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },

    /// Manage scheduled backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Check whether the configuration changed since the last deploy
    Drift {
        uuid: String,

        /// Commit the new fingerprint when drift is detected
        #[arg(long)]
        save: bool,
    },

    /// Print connection URLs
    Urls { uuid: String },

    /// Soft-delete a database
    Delete { uuid: String },

    /// Permanently delete a soft-deleted database and everything it owns
    Destroy {
        uuid: String,

        /// Skip confirmation prompt
        #[arg(long)]
        auto_approve: bool,
    },

    /// Remove remote artifacts of a database
    Cleanup {
        #[command(subcommand)]
        command: CleanupCommands,
    },

    /// Query container metrics from the server's metrics agent
    Metrics {
        #[command(subcommand)]
        command: MetricsCommands,
    },
}

#[derive(Subcommand)]
enum ServerCommands {
    /// Register or update a server
    Add {
        name: String,
        ip: String,

        #[arg(long, default_value = "root")]
        user: String,

        #[arg(long, default_value = "22")]
        port: u16,

        /// SSH private key
        #[arg(long)]
        key: Option<PathBuf>,

        /// Bearer token of the metrics agent
        #[arg(long)]
        metrics_token: Option<String>,
    },
    /// List servers
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum DestinationArg {
    StandaloneDocker,
    Swarm,
    Kubernetes,
}

impl DestinationArg {
    fn kind(self) -> &'static str {
        match self {
            DestinationArg::StandaloneDocker => destination_kind::STANDALONE_DOCKER,
            DestinationArg::Swarm => destination_kind::SWARM,
            DestinationArg::Kubernetes => destination_kind::KUBERNETES,
        }
    }
}

#[derive(clap::Args)]
struct CreateArgs {
    name: String,

    /// Server name or id
    #[arg(long)]
    server: String,

    #[arg(long, value_enum, default_value = "standalone-docker")]
    destination: DestinationArg,

    /// Kubernetes namespace
    #[arg(long)]
    namespace: Option<String>,

    #[arg(long)]
    image: Option<String>,

    #[arg(long)]
    user: Option<String>,

    /// Generated when omitted
    #[arg(long)]
    password: Option<String>,

    #[arg(long)]
    db: Option<String>,

    /// Comma-separated host:container port mappings
    #[arg(long)]
    ports: Option<String>,

    #[arg(long)]
    initdb_args: Option<String>,

    #[arg(long)]
    host_auth_method: Option<String>,

    /// Publish on this host port
    #[arg(long)]
    public_port: Option<u16>,

    #[arg(long)]
    enable_ssl: bool,

    #[arg(long)]
    ssl_mode: Option<String>,
}

#[derive(Subcommand)]
enum StatusCommands {
    /// Record an observed container status, e.g. "running (healthy)"
    Set { uuid: String, status: String },
    /// Show the stored status
    Show { uuid: String },
}

#[derive(Subcommand)]
enum EnvCommands {
    /// Set a variable (overwrites an existing key)
    Set {
        uuid: String,
        key: String,
        value: String,
    },
    /// List variable names
    List { uuid: String },
}

#[derive(Subcommand)]
enum TagCommands {
    /// Attach a tag
    Add { uuid: String, name: String },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Add a backup schedule
    Add {
        uuid: String,
        /// Cron expression or shorthand such as `daily`
        frequency: String,

        #[arg(long, default_value = "7")]
        keep: u32,
    },
}

#[derive(Subcommand)]
enum CleanupCommands {
    /// Remove the configuration directory on the server
    Configs { uuid: String },
    /// Remove every owned docker volume on the server
    Volumes { uuid: String },
}

#[derive(Subcommand)]
enum MetricsCommands {
    Cpu {
        uuid: String,
        #[arg(long)]
        mins: Option<i64>,
    },
    Memory {
        uuid: String,
        #[arg(long)]
        mins: Option<i64>,
    },
}

/// Shared handles built once per invocation.
struct App {
    settings: Settings,
    backend: Arc<dyn StateBackend>,
    exec: Arc<dyn RemoteExec>,
    coordinator: LifecycleCoordinator,
}

#[tokio::main]
async fn main() -> Result<()> {
    #[cfg(unix)]
    reset_sigpipe();

    let cli = Cli::parse();

    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) if cli.verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::new("warn"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let app = build_app(&cli).await?;

    match cli.command {
        Commands::Init => cmd_init(&app),
        Commands::Server { ref command } => cmd_server(&app, command).await,
        Commands::Create(ref args) => cmd_create(&app, args).await,
        Commands::Show {
            ref uuid,
            all,
            json,
        } => cmd_show(&app, uuid.as_deref(), all, json).await,
        Commands::Status { ref command } => cmd_status(&app, command).await,
        Commands::Env { ref command } => cmd_env(&app, command).await,
        Commands::Tag { ref command } => cmd_tag(&app, command).await,
        Commands::Backup { ref command } => cmd_backup(&app, command).await,
        Commands::Drift { ref uuid, save } => cmd_drift(&app, uuid, save).await,
        Commands::Urls { ref uuid } => cmd_urls(&app, uuid).await,
        Commands::Delete { ref uuid } => cmd_delete(&app, uuid).await,
        Commands::Destroy {
            ref uuid,
            auto_approve,
        } => cmd_destroy(&app, uuid, auto_approve).await,
        Commands::Cleanup { ref command } => cmd_cleanup(&app, command).await,
        Commands::Metrics { ref command } => cmd_metrics(&app, command).await,
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn build_app(cli: &Cli) -> Result<App> {
    let mut settings = load_settings(&cli.config)?;
    if let Some(ref state) = cli.state {
        settings.state_path = state.clone();
    }

    let backend = SqliteBackend::open(&settings.state_path)?;
    backend.initialize().await?;
    let backend: Arc<dyn StateBackend> = Arc::new(backend);
    let exec: Arc<dyn RemoteExec> = Arc::new(SshExecutor::new(settings.ssh.clone()));
    let coordinator = LifecycleCoordinator::new(Arc::clone(&backend), Arc::clone(&exec), &settings);

    Ok(App {
        settings,
        backend,
        exec,
        coordinator,
    })
}

async fn load_database(app: &App, uuid: &str) -> Result<ResourceDescriptor> {
    app.backend
        .get_resource(uuid)
        .await?
        .with_context(|| format!("Database '{}' not found", uuid))
}

fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;
    println!("\n{} Only '{}' will be accepted.", prompt, "yes".bold());
    print!("  Enter a value: ");
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim() == "yes")
}

// ─── Commands ────────────────────────────────────────────────────────────────

fn cmd_init(app: &App) -> Result<()> {
    formatter::print_success(&format!(
        "State database ready at {}.",
        app.settings.state_path
    ));
    Ok(())
}

async fn cmd_server(app: &App, command: &ServerCommands) -> Result<()> {
    match command {
        ServerCommands::Add {
            name,
            ip,
            user,
            port,
            key,
            metrics_token,
        } => {
            let mut server = match app.backend.get_server(name).await? {
                Some(existing) => existing,
                None => Server::new(name, ip),
            };
            server.ip = ip.clone();
            server.user = user.clone();
            server.port = *port;
            server.private_key_path = key.clone();
            if let Some(token) = metrics_token {
                server.metrics_token = Some(Secret::new(token.clone()));
            }
            app.backend.upsert_server(&server).await?;
            formatter::print_success(&format!("Server '{}' saved.", server.name));
        }
        ServerCommands::List => {
            let servers = app.backend.list_servers().await?;
            formatter::print_server_list(&servers);
        }
    }
    Ok(())
}

async fn cmd_create(app: &App, args: &CreateArgs) -> Result<()> {
    let server = app
        .backend
        .get_server(&args.server)
        .await?
        .with_context(|| format!("Server '{}' not found. Add it with 'pgkeep server add'.", args.server))?;
    let destination = Destination::from_parts(
        args.destination.kind(),
        server,
        args.namespace.clone(),
    )?;

    let mut resource = ResourceDescriptor::new(&args.name, destination);
    if let Some(ref image) = args.image {
        resource.image = image.clone();
    }
    if let Some(ref user) = args.user {
        resource.postgres_user = user.clone();
    }
    if let Some(ref password) = args.password {
        resource.postgres_password = Secret::new(password.clone());
    }
    if let Some(ref db) = args.db {
        resource.postgres_db = db.clone();
    }
    resource.set_ports_mappings(args.ports.as_deref());
    resource.postgres_initdb_args = args.initdb_args.clone();
    resource.postgres_host_auth_method = args.host_auth_method.clone();
    if let Some(port) = args.public_port {
        resource.is_public = true;
        resource.public_port = Some(port);
    }
    resource.enable_ssl = args.enable_ssl;
    if let Some(ref mode) = args.ssl_mode {
        resource.ssl_mode = mode.parse::<SslMode>()?;
    }

    let volume = app.coordinator.create(&resource).await?;
    formatter::print_success(&format!(
        "Database '{}' created with uuid {} (volume {}).",
        resource.name, resource.uuid, volume.name
    ));
    Ok(())
}

async fn cmd_show(app: &App, uuid: Option<&str>, all: bool, json: bool) -> Result<()> {
    let Some(uuid) = uuid else {
        let filter = ResourceFilter {
            include_deleted: all,
            ..Default::default()
        };
        let resources = app.backend.list_resources(&filter).await?;
        if json {
            let views: Vec<ResourceView> = resources.iter().map(ResourceView::from).collect();
            println!("{}", serde_json::to_string_pretty(&views)?);
        } else {
            formatter::print_database_list(&resources);
        }
        return Ok(());
    };

    let resource = load_database(app, uuid).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ResourceView::from(&resource))?
        );
        return Ok(());
    }

    let volumes = app.backend.list_persistent_volumes(&resource.id).await?;
    let backups = app.backend.list_scheduled_backups(&resource.id).await?;
    let environment = app.backend.list_environment_variables(&resource.id).await?;
    let tags = app.backend.list_tags(&resource.id).await?;
    formatter::print_database_detail(
        &resource,
        &Owned {
            volumes: &volumes,
            backups: &backups,
            environment: &environment,
            tags: &tags,
        },
    );
    Ok(())
}

async fn cmd_status(app: &App, command: &StatusCommands) -> Result<()> {
    match command {
        StatusCommands::Set { uuid, status } => {
            let (resource, changed) = app.coordinator.update_status(uuid, status).await?;
            if changed {
                formatter::print_success(&format!("Status is now {}.", resource.real_status()));
            } else {
                println!("{}", "Status unchanged.".dimmed());
            }
        }
        StatusCommands::Show { uuid } => {
            let resource = load_database(app, uuid).await?;
            println!("{}", resource.real_status());
        }
    }
    Ok(())
}

async fn cmd_env(app: &App, command: &EnvCommands) -> Result<()> {
    match command {
        EnvCommands::Set { uuid, key, value } => {
            let resource = load_database(app, uuid).await?;
            let _guard = app.coordinator.locks().acquire(&resource.uuid).await;
            app.backend
                .set_environment_variable(&resource.id, key, value)
                .await?;
            formatter::print_success(&format!("Set {} on '{}'.", key, resource.name));
        }
        EnvCommands::List { uuid } => {
            let resource = load_database(app, uuid).await?;
            for env in app.backend.list_environment_variables(&resource.id).await? {
                println!("{}", env.key);
            }
        }
    }
    Ok(())
}

async fn cmd_tag(app: &App, command: &TagCommands) -> Result<()> {
    let TagCommands::Add { uuid, name } = command;
    let resource = load_database(app, uuid).await?;
    let tag = app.backend.attach_tag(&resource.id, name).await?;
    formatter::print_success(&format!("Tagged '{}' with {}.", resource.name, tag.name));
    Ok(())
}

async fn cmd_backup(app: &App, command: &BackupCommands) -> Result<()> {
    let BackupCommands::Add {
        uuid,
        frequency,
        keep,
    } = command;
    let resource = load_database(app, uuid).await?;
    if !resource.is_backup_solution_available() {
        formatter::print_warning("Backups are not available for this database.");
        return Ok(());
    }
    let mut backup = ScheduledBackup::new(&resource.id, frequency);
    backup.keep_locally = *keep;
    app.backend.create_scheduled_backup(&backup).await?;
    formatter::print_success(&format!(
        "Scheduled {} backups for '{}'.",
        frequency, resource.name
    ));
    Ok(())
}

async fn cmd_drift(app: &App, uuid: &str, save: bool) -> Result<()> {
    let mut resource = load_database(app, uuid).await?;
    let drifted = app.coordinator.is_config_drifted(&mut resource, save).await?;
    formatter::print_drift(&resource, drifted, save && drifted);
    Ok(())
}

async fn cmd_urls(app: &App, uuid: &str) -> Result<()> {
    let resource = load_database(app, uuid).await?;
    formatter::print_urls(&resource);
    Ok(())
}

async fn cmd_delete(app: &App, uuid: &str) -> Result<()> {
    let mut resource = load_database(app, uuid).await?;
    if resource.is_deleted() {
        println!("{}", "Database is already deleted.".dimmed());
        return Ok(());
    }
    app.coordinator.soft_delete(&mut resource).await?;
    formatter::print_success(&format!(
        "Database '{}' deleted. Run 'pgkeep destroy {}' to remove it permanently.",
        resource.name, resource.uuid
    ));
    Ok(())
}

async fn cmd_destroy(app: &App, uuid: &str, auto_approve: bool) -> Result<()> {
    let resource = load_database(app, uuid).await?;
    if !resource.is_deleted() {
        formatter::print_error(&format!(
            "Database '{}' must be deleted first ('pgkeep delete {}').",
            resource.name, resource.uuid
        ));
        return Ok(());
    }

    if !auto_approve {
        let prompt = format!(
            "Permanently destroy '{}', its volumes and configuration on {}?",
            resource.name,
            resource.server().name
        );
        if !confirm(&prompt)? {
            println!("\n{}", "Destroy cancelled.".yellow());
            return Ok(());
        }
    }

    let name = resource.name.clone();
    let report = app.coordinator.destroy(resource).await?;
    formatter::print_destroy_report(&report);
    if report.cleanup.is_clean() {
        formatter::print_success(&format!("Database '{}' destroyed.", name));
    } else {
        formatter::print_warning(&format!(
            "Database '{}' destroyed; {} remote artifact(s) need manual cleanup.",
            name,
            report.cleanup.failures.len()
        ));
    }
    Ok(())
}

async fn cmd_cleanup(app: &App, command: &CleanupCommands) -> Result<()> {
    let policy = RetryPolicy::from_settings(&app.settings);
    match command {
        CleanupCommands::Configs { uuid } => {
            let resource = load_database(app, uuid).await?;
            let removed = with_retry(policy, "delete_configuration_directory", || {
                app.coordinator.delete_configuration_directory(&resource)
            })
            .await?;
            if removed {
                formatter::print_success(&format!(
                    "Removed {}.",
                    app.coordinator.workdir(&resource).display()
                ));
            } else {
                formatter::print_warning("Configuration directory left in place.");
            }
        }
        CleanupCommands::Volumes { uuid } => {
            let resource = load_database(app, uuid).await?;
            let report = app.coordinator.delete_volumes(&resource).await?;
            for volume in &report.removed {
                println!("  {} volume {}", "-".red().bold(), volume);
            }
            for failure in &report.failures {
                formatter::print_warning(&format!("{}: {}", failure.target, failure.error));
            }
            if report.removed.is_empty() && report.is_clean() {
                println!("{}", "No volumes to remove.".dimmed());
            }
        }
    }
    Ok(())
}

async fn cmd_metrics(app: &App, command: &MetricsCommands) -> Result<()> {
    let (uuid, metric, mins) = match command {
        MetricsCommands::Cpu { uuid, mins } => (uuid, MetricKind::Cpu, *mins),
        MetricsCommands::Memory { uuid, mins } => (uuid, MetricKind::Memory, *mins),
    };
    let resource = load_database(app, uuid).await?;
    let query = MetricsQuery::new(Arc::clone(&app.exec), app.settings.metrics.clone());
    let policy = RetryPolicy::from_settings(&app.settings);

    let points = with_retry(policy, "metrics", || {
        query.recent(resource.server(), &resource.uuid, metric, mins)
    })
    .await?;
    formatter::print_metrics(metric, &points);
    Ok(())
}
