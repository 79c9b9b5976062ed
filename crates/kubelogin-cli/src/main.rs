//! Main entry point for kubelogin

use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use kubelogin_cli::cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();
    let verbose = args.is_verbose();

    // Environment is set before the runtime spawns its worker threads
    if verbose {
        std::env::set_var("RUST_LIB_BACKTRACE", "1");
    }

    color_eyre::config::HookBuilder::default()
        .display_location_section(false)
        .display_env_section(false)
        .install()?;

    // stdout is reserved for the exec credential, logs go to stderr
    kubelogin_common::logging::init_cli_logging(&args.verbosity, "kubelogin=info")
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("Failed to start the async runtime")?;

    if let Err(report) = runtime.block_on(args.run()) {
        if verbose {
            eprintln!("error: {:?}", report);
        } else {
            eprintln!("error: {:#}", report);
        }
        std::process::exit(1);
    }
    Ok(())
}
