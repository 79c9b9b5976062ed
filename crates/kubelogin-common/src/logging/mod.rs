//! Unified logging initialization for kubelogin binaries
//!
//! This module provides a standardized logging setup that respects the following priority order:
//! 1. CLI flags (`-v/-q`) - highest priority
//! 2. RUST_LOG environment variable
//! 3. Binary-specific defaults when RUST_LOG cannot be parsed
//!
//! Without either, logging stays off.
//!
//! Log output always goes to stderr. When kubelogin runs as a kubectl credential
//! plugin, stdout carries the `ExecCredential` document and must stay clean.

use anyhow::Result;
use clap_verbosity_flag::{LevelFilter, LogLevel, Verbosity};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the stderr subscriber with `filter`
fn install(filter: EnvFilter) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true) // Show module path
                .with_file(true) // Show source file
                .with_line_number(true) // Show line number
                .compact(), // Use compact format
        )
        .try_init()?;

    Ok(())
}

/// Filter for the CLI: any `-v` turns on debug output, the highest count trace
///
/// Without flags the filter comes from `RUST_LOG`; `None` means logging stays off.
fn cli_filter<L: LogLevel>(
    verbosity: &Verbosity<L>,
    default_filter: &str,
) -> Result<Option<EnvFilter>> {
    let filter = match verbosity.log_level_filter() {
        LevelFilter::Off if std::env::var("RUST_LOG").is_ok() => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
        }
        LevelFilter::Off => return Ok(None),
        LevelFilter::Trace => EnvFilter::try_new("trace")?,
        _ => EnvFilter::try_new("debug")?,
    };
    Ok(Some(filter))
}

/// Initialize logging for CLI tools that should have minimal output by default
///
/// Logging is only enabled when explicitly requested via flags or RUST_LOG.
///
/// # Arguments
///
/// * `verbosity` - The verbosity flags from clap (-v/-q)
/// * `default_filter` - Used when RUST_LOG is set but cannot be parsed
///
/// # Returns
///
/// * `true` if logging was initialized
/// * `false` if logging was not initialized (no flags and no RUST_LOG)
///
/// # Example
///
/// ```no_run
/// use clap::Parser;
/// use clap_verbosity_flag::{OffLevel, Verbosity};
/// use kubelogin_common::logging;
///
/// #[derive(Parser)]
/// struct Args {
///     #[clap(flatten)]
///     verbosity: Verbosity<OffLevel>,
/// }
///
/// let args = Args::parse();
/// logging::init_cli_logging(&args.verbosity, "kubelogin=info").unwrap();
/// ```
pub fn init_cli_logging<L: LogLevel>(
    verbosity: &Verbosity<L>,
    default_filter: &str,
) -> Result<bool> {
    match cli_filter(verbosity, default_filter)? {
        Some(filter) => {
            install(filter)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
