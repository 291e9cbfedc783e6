//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use serde_json::json;
use stratum_core::{BackupRecord, MigrationPlan};

use crate::commands::StatusReport;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format the migration status of a store.
    fn format_status(&self, status: &StatusReport) -> String;

    /// Format a migration plan.
    fn format_plan(&self, plan: &MigrationPlan) -> String;

    /// Format a list of backups, newest first.
    fn format_backups(&self, backups: &[BackupRecord]) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_status(&self, status: &StatusReport) -> String {
        let mut table = Table::new();
        table.set_header(vec![Cell::new("property"), Cell::new("value")]);
        table.add_row(vec![Cell::new("store"), Cell::new(&status.store)]);
        table.add_row(vec![Cell::new("current version"), Cell::new(status.current_version)]);
        table.add_row(vec![Cell::new("destination version"), Cell::new(status.destination_version)]);
        table.add_row(vec![
            Cell::new("migration required"),
            Cell::new(if status.requires_migration { "yes" } else { "no" }),
        ]);
        table.add_row(vec![Cell::new("backups"), Cell::new(status.backup_count)]);
        table.add_row(vec![
            Cell::new("latest backup"),
            Cell::new(status.latest_backup.as_deref().unwrap_or("-")),
        ]);
        table.to_string()
    }

    fn format_plan(&self, plan: &MigrationPlan) -> String {
        if plan.is_empty() {
            return format!("{} is already at {}", plan.store, plan.destination);
        }

        let mut table = Table::new();
        table.set_header(vec![Cell::new("step"), Cell::new("from"), Cell::new("to")]);
        for step in &plan.steps {
            table.add_row(vec![
                Cell::new(step.index + 1),
                Cell::new(step.source),
                Cell::new(step.destination),
            ]);
        }
        format!(
            "{}\n{} step(s) from {} to {}",
            table,
            plan.step_count(),
            plan.source,
            plan.destination
        )
    }

    fn format_backups(&self, backups: &[BackupRecord]) -> String {
        if backups.is_empty() {
            return "No backups".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec![
            Cell::new("id"),
            Cell::new("created"),
            Cell::new("files"),
            Cell::new("size"),
        ]);
        for record in backups {
            table.add_row(vec![
                Cell::new(&record.id),
                Cell::new(record.created_at.format("%Y-%m-%d %H:%M:%S UTC")),
                Cell::new(record.files.len()),
                Cell::new(format_size(record.total_size())),
            ]);
        }
        format!("{}\n{} backup(s)", table, backups.len())
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_status(&self, status: &StatusReport) -> String {
        let value = json!({
            "store": status.store,
            "current_version": status.current_version,
            "destination_version": status.destination_version,
            "requires_migration": status.requires_migration,
            "backup_count": status.backup_count,
            "latest_backup": status.latest_backup,
        });
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_plan(&self, plan: &MigrationPlan) -> String {
        let steps: Vec<_> = plan
            .steps
            .iter()
            .map(|step| json!({"index": step.index, "from": step.source, "to": step.destination}))
            .collect();
        let value = json!({
            "store": plan.store.to_string(),
            "source": plan.source,
            "destination": plan.destination,
            "steps": steps,
        });
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_backups(&self, backups: &[BackupRecord]) -> String {
        let values: Vec<_> = backups
            .iter()
            .map(|record| {
                json!({
                    "id": record.id,
                    "location": record.location.display().to_string(),
                    "created_at": record.created_at,
                    "files": record.files,
                })
            })
            .collect();
        serde_json::to_string_pretty(&values).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_message(&self, message: &str) -> String {
        json!({ "message": message }).to_string()
    }
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
