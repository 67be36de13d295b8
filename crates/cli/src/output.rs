//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table of rows, or a message when there are none
pub fn print_table<T: Tabled>(rows: Vec<T>, empty_message: &str) {
    if rows.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a monthly dollar amount
pub fn format_currency(amount: f64) -> String {
    format!("${:.2}", amount)
}

pub fn format_optional_currency(amount: Option<f64>) -> String {
    amount.map(format_currency).unwrap_or_else(|| "-".to_string())
}

pub fn format_gb(size_gb: u64) -> String {
    format!("{} GB", size_gb)
}

/// Color a classification or execution status
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "idle" => status.red().to_string(),
        "overprovisioned-size" | "overprovisioned-performance" => status.yellow().to_string(),
        "none" => status.dimmed().to_string(),
        "snapshot_initiated" | "delete_initiated" | "modification_initiated" => {
            status.green().to_string()
        }
        "no_change_needed" => status.blue().to_string(),
        "skipped_root_volume" | "skipped_root_volume_resize" => status.yellow().to_string(),
        "failed" | "error" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Truncate long free text for table cells
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
