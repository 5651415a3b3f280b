use colored::Colorize;

use crate::metrics::{MetricKind, MetricPoint};
use crate::resource::descriptor::{ResourceDescriptor, Server};
use crate::resource::lifecycle::{lifecycle_state, CascadeSummary, DestroyReport};
use crate::resource::status::Status;
use crate::resource::url;
use crate::state::models::{EnvironmentVariable, PersistentVolume, ScheduledBackup, Tag};

/// Print a success message.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

/// Print an error message.
pub fn print_error(msg: &str) {
    println!("{} {}", "✗".red().bold(), msg.red());
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "!".yellow().bold(), msg.yellow());
}

fn colored_status(status: &Status) -> String {
    let text = status.to_string();
    if status.is_running() && status.health == "healthy" {
        text.green().to_string()
    } else if status.is_running() {
        text.yellow().to_string()
    } else if status.is_exited() {
        text.red().to_string()
    } else {
        text
    }
}

/// Print the servers known to state.
pub fn print_server_list(servers: &[Server]) {
    if servers.is_empty() {
        println!("{}", "No servers registered.".dimmed());
        return;
    }

    println!();
    println!(
        "  {:<20} {:<18} {:<12} {}",
        "NAME".bold(),
        "ADDRESS".bold(),
        "USER".bold(),
        "FUNCTIONAL".bold()
    );
    println!("{}", "─".repeat(64));
    for server in servers {
        let functional = if server.is_functional {
            "yes".green()
        } else {
            "no".red()
        };
        println!(
            "  {:<20} {:<18} {:<12} {}",
            server.name,
            format!("{}:{}", server.ip, server.port),
            server.user,
            functional
        );
    }
    println!();
}

/// Print a list of databases.
pub fn print_database_list(resources: &[ResourceDescriptor]) {
    if resources.is_empty() {
        println!("{}", "No databases in state.".dimmed());
        return;
    }

    println!();
    println!("{}", "Databases".bold().cyan());
    println!("{}", "─".repeat(80));
    println!(
        "  {:<34} {:<18} {:<22} {}",
        "UUID".bold(),
        "NAME".bold(),
        "STATUS".bold(),
        "SERVER".bold()
    );
    println!("{}", "─".repeat(80));

    for resource in resources {
        let mut name = resource.name.clone();
        if resource.is_deleted() {
            name.push_str(" (deleted)");
        }
        println!(
            "  {:<34} {:<18} {:<22} {}",
            resource.uuid,
            name,
            colored_status(&resource.status()),
            resource.server().name.dimmed()
        );
    }

    println!();
    println!("  {} database(s) total.", resources.len());
    println!();
}

/// Everything owned by a database, for the detail view.
pub struct Owned<'a> {
    pub volumes: &'a [PersistentVolume],
    pub backups: &'a [ScheduledBackup],
    pub environment: &'a [EnvironmentVariable],
    pub tags: &'a [Tag],
}

/// Print detailed database state.
pub fn print_database_detail(resource: &ResourceDescriptor, owned: &Owned<'_>) {
    println!();
    println!("{} {}", "Database:".bold().cyan(), resource.name.bold());
    println!("{}", "─".repeat(60));
    println!("  {:<18} {}", "UUID:".bold(), resource.uuid);
    println!("  {:<18} {}", "Type:".bold(), resource.database_type());
    println!("  {:<18} {}", "Image:".bold(), resource.image);
    println!("  {:<18} {}", "Status:".bold(), colored_status(&resource.status()));
    println!("  {:<18} {:?}", "Lifecycle:".bold(), lifecycle_state(resource));
    println!(
        "  {:<18} {} ({})",
        "Server:".bold(),
        resource.server().name,
        resource.destination.kind()
    );
    if let Some(namespace) = resource.destination.namespace() {
        println!("  {:<18} {}", "Namespace:".bold(), namespace);
    }
    if let Some(ports) = resource.ports_mappings() {
        println!("  {:<18} {}", "Ports:".bold(), ports);
    }
    println!(
        "  {:<18} {}",
        "Config hash:".bold(),
        resource.config_hash().unwrap_or("(never committed)")
    );
    if let Some(at) = resource.last_online_at() {
        println!("  {:<18} {}", "Last change:".bold(), at.to_rfc3339());
    }
    println!("  {:<18} {}", "Created:".bold(), resource.created_at.to_rfc3339());
    println!("  {:<18} {}", "Updated:".bold(), resource.updated_at.to_rfc3339());

    if !owned.volumes.is_empty() {
        println!();
        println!("  {}:", "Volumes".bold());
        for volume in owned.volumes {
            let ro = if volume.is_readonly { " (ro)" } else { "" };
            println!("    {} -> {}{}", volume.name, volume.mount_path, ro.dimmed());
        }
    }
    if !owned.backups.is_empty() {
        println!();
        println!("  {}:", "Scheduled backups".bold());
        for backup in owned.backups {
            let state = if backup.enabled { "enabled" } else { "disabled" };
            println!(
                "    {:<20} {} keep {}",
                backup.frequency,
                state,
                backup.keep_locally
            );
        }
    }
    if !owned.environment.is_empty() {
        println!();
        println!("  {}:", "Environment".bold());
        for env in owned.environment {
            println!("    {:<24} = {}", env.key, "(sensitive)".dimmed());
        }
    }
    if !owned.tags.is_empty() {
        let names: Vec<&str> = owned.tags.iter().map(|t| t.name.as_str()).collect();
        println!();
        println!("  {:<18} {}", "Tags:".bold(), names.join(", "));
    }

    println!("{}", "─".repeat(60));
    println!();
}

/// Print connection URLs.
pub fn print_urls(resource: &ResourceDescriptor) {
    println!("  {:<10} {}", "internal".bold(), url::internal_url(resource));
    match url::external_url(resource) {
        Some(external) => println!("  {:<10} {}", "external".bold(), external),
        None => println!("  {:<10} {}", "external".bold(), "(not published)".dimmed()),
    }
}

pub fn print_drift(resource: &ResourceDescriptor, drifted: bool, saved: bool) {
    if !drifted {
        println!(
            "{} {}",
            "✓".green().bold(),
            format!("'{}' matches its committed configuration.", resource.name).green()
        );
        return;
    }
    println!(
        "{} {}",
        "~".yellow().bold(),
        format!(
            "'{}' configuration drifted; the container must be recreated.",
            resource.name
        )
        .yellow()
    );
    if saved {
        println!("  New fingerprint committed.");
    }
}

pub fn print_cascade(summary: &CascadeSummary) {
    println!(
        "  Removed {} volume(s), {} backup schedule(s), {} environment variable(s); detached {} tag(s).",
        summary.persistent_volumes,
        summary.scheduled_backups,
        summary.environment_variables,
        summary.tags_detached
    );
}

pub fn print_destroy_report(report: &DestroyReport) {
    if report.configuration_removed {
        println!("  {} configuration directory", "-".red().bold());
    }
    for volume in &report.cleanup.removed {
        println!("  {} volume {}", "-".red().bold(), volume);
    }
    for failure in &report.cleanup.failures {
        print_warning(&format!(
            "{} failed for {}: {}",
            failure.operation, failure.target, failure.error
        ));
    }
    print_cascade(&report.cascade);
}

pub fn print_metrics(metric: MetricKind, points: &[MetricPoint]) {
    if points.is_empty() {
        println!("{}", "No samples in the requested window.".dimmed());
        return;
    }
    let unit = match metric {
        MetricKind::Cpu => "%",
        MetricKind::Memory => " MB",
    };
    println!("  {:<22} {}", "TIME".bold(), metric.as_str().to_uppercase().bold());
    for point in points {
        let time = chrono::DateTime::from_timestamp(point.timestamp, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| point.timestamp.to_string());
        println!("  {:<22} {:.2}{}", time, point.value, unit);
    }
}
