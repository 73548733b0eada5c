use std::process::ExitCode;

use clap::Parser;

use agent_shim::logging::{init_logger, install_panic_hook, SHIM_NAME};
use agent_shim::{process_exit_byte, run_shim, Cli, ShimConfig, EXIT_FAILURE};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Nothing is proxied yet, so configuration errors can still use stderr.
    let config = match ShimConfig::from_cli(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{SHIM_NAME}: {e}");
            return ExitCode::from(process_exit_byte(EXIT_FAILURE));
        }
    };

    init_logger(config.log_level, config.log_file.as_deref());
    install_panic_hook(config.crash_on_error);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("agent-shim-worker")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to create runtime");
            eprintln!("{SHIM_NAME}: failed to create runtime: {e}");
            return ExitCode::from(process_exit_byte(EXIT_FAILURE));
        }
    };

    let code = rt.block_on(run_shim(&config));

    // The stdin copy may still be parked on a blocking read; leave it behind.
    rt.shutdown_background();

    ExitCode::from(process_exit_byte(code))
}
