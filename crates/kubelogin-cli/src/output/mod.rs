//! Output formatting utilities
//!
//! Human-readable messages go to stderr. stdout is reserved for the
//! `ExecCredential` document read by kubectl.

use console::style;
use serde::Serialize;

/// Write data as JSON on stdout
pub fn json_output<T: Serialize>(data: &T) -> serde_json::Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    println!("{json}");
    Ok(())
}

/// Print a success message with green checkmark
pub fn print_success(message: &str) {
    eprintln!("{} {}", style("✓").green().bold(), message);
}

/// Print an informational message with blue info icon
pub fn print_info(message: &str) {
    eprintln!("{} {}", style("ℹ").blue(), message);
}

/// Compress a path to use tilde notation for home directory
pub fn compress_path(path: &std::path::Path) -> String {
    if let Ok(home_dir) = etcetera::home_dir() {
        if let Ok(relative) = path.strip_prefix(&home_dir) {
            return format!("~/{}", relative.display());
        }
    }
    path.display().to_string()
}
