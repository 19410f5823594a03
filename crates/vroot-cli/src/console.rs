//! CLI console utilities

use colored::*;

/// CLI console for formatted output
#[derive(Debug, Default)]
pub struct CliConsole;

impl CliConsole {
    /// Print a success message
    pub fn success(&self, message: &str) {
        println!("{} {}", "✓".green().bold(), message.green());
    }

    /// Print a warning message
    pub fn warn(&self, message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message.yellow());
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message.red());
    }

    /// Print a header
    pub fn print_header(&self, title: &str) {
        println!();
        println!("{}", title.bold().underline());
        println!("{}", "=".repeat(title.len()).dimmed());
    }

    /// Print one `virtual -> host` mapping line
    pub fn print_mapping(&self, from: &str, to: &str, notes: &[String]) {
        if notes.is_empty() {
            println!("{} {} {}", from, "->".dimmed(), to.cyan());
        } else {
            println!(
                "{} {} {} {}",
                from,
                "->".dimmed(),
                to.cyan(),
                format!("({})", notes.join(", ")).dimmed()
            );
        }
    }

    /// Print a key/value table
    pub fn print_fields(&self, fields: &[(&str, String)]) {
        let width = fields.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (key, value) in fields {
            println!("  {:width$}  {}", key.bold(), value, width = width);
        }
    }

    /// Print JSON on a single line
    pub fn print_json(&self, json: &serde_json::Value) {
        println!("{}", json);
    }
}
