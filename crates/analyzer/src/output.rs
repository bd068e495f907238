//! Output formatting utilities

use analyzer_lib::{HealthStatus, Level};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a rounded table, or a notice when there are none
pub fn print_table<T: Tabled>(rows: &[T], empty_message: &str) {
    if rows.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

/// Pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_header(title: &str) {
    println!("\n{}", title.bold());
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

/// Format a 0-1 ratio as a percentage
pub fn format_ratio(ratio: f64) -> String {
    format!("{:.0}%", ratio * 100.0)
}

pub fn color_health(status: HealthStatus) -> String {
    let text = status.to_string();
    match status {
        HealthStatus::Healthy => text.green().to_string(),
        HealthStatus::Warning => text.yellow().to_string(),
        HealthStatus::Critical => text.red().to_string(),
    }
}

pub fn color_level(level: Level) -> String {
    let text = level.to_string();
    match level {
        Level::High => text.red().to_string(),
        Level::Medium => text.yellow().to_string(),
        Level::Low => text.blue().to_string(),
    }
}

/// Color accuracy based on value
pub fn color_accuracy(accuracy: f64) -> String {
    let formatted = format_ratio(accuracy);
    if accuracy >= 0.8 {
        formatted.green().to_string()
    } else if accuracy >= 0.5 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ratio() {
        assert_eq!(format_ratio(0.456), "46%");
        assert_eq!(format_ratio(1.0), "100%");
    }

    #[test]
    fn test_colors_keep_text() {
        colored::control::set_override(false);
        assert_eq!(color_health(HealthStatus::Warning), "warning");
        assert_eq!(color_level(Level::High), "high");
        assert_eq!(color_accuracy(0.3), "30%");
    }
}
