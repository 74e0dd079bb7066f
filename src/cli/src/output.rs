//! Output formatting utilities for the Tessera CLI.
//!
//! Supports table, JSON, and YAML output formats. Human-oriented messages go
//! to stderr so that JSON/YAML on stdout can be piped.

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// Output format selection.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
    /// Render as YAML
    Yaml,
}

/// Print a success message.
pub fn print_success(msg: &str) {
    eprintln!("{} {}", "[OK]".green().bold(), msg);
}

/// Print an error message.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

/// Print a warning message.
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), msg);
}

/// Print an informational message.
pub fn print_info(msg: &str) {
    eprintln!("{} {}", "[INFO]".blue().bold(), msg);
}

/// Render rows as a rounded table, or `None` when there are no rows.
pub fn render_table<T: Tabled>(items: &[T]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    Some(
        Table::new(items)
            .with(Style::rounded())
            .with(Modify::new(Columns::first()).with(Alignment::left()))
            .to_string(),
    )
}

/// Print a list of items in the requested format.
///
/// For table output, items must implement `Tabled`. For JSON/YAML, items must
/// implement `Serialize`.
pub fn print_list<T: Tabled + Serialize>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => match render_table(items) {
            Some(table) => println!("{}", table),
            None => println!("{}", "No results found.".dimmed()),
        },
        _ => print_item(&items, format)?,
    }
    Ok(())
}

/// Print a single item in the requested format. Tables fall back to JSON.
pub fn print_item<T: Serialize + ?Sized>(item: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            let json = serde_json::to_string_pretty(item).context("Failed to serialize to JSON")?;
            println!("{}", json);
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(item).context("Failed to serialize to YAML")?;
            print!("{}", yaml);
        }
    }
    Ok(())
}

/// Print key-value details to the terminal (non-JSON/YAML output).
pub fn print_detail(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

/// Print a section header.
pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}
