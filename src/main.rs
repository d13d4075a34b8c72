use clap::Parser;
use hydrometer_listener::app::{self, Options, RunError};
use hydrometer_listener::output::OutputKind;
use hydrometer_listener::output::stdout::WritePublisher;
use hydrometer_listener::scanner::RealScanner;
use std::panic::{self, PanicHookInfo};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "mqtt")]
use hydrometer_listener::output::mqtt::MqttPublisher;

/// Exit codes for the application
const EXIT_SUCCESS: u8 = 0;
const EXIT_ERROR: u8 = 1;
const EXIT_PANIC: i32 = 2;

/// Log to stderr; `RUST_LOG` overrides the level chosen by `--verbose`.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(err) => {
            tracing::warn!(%err, "could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

async fn run(options: Options) -> Result<(), RunError> {
    let config = options.config();
    let scanner = RealScanner::new(options.backend);

    match options.output {
        #[cfg(feature = "mqtt")]
        OutputKind::Mqtt => {
            let publisher = MqttPublisher::connect(&options.mqtt_settings());
            let result =
                app::run_with(&config, options.once, &scanner, &publisher, shutdown_signal()).await;
            publisher.close().await;
            result
        }
        OutputKind::Stdout => {
            let publisher = WritePublisher::new(std::io::stdout());
            app::run_with(&config, options.once, &scanner, &publisher, shutdown_signal()).await
        }
    }
}

// Returning instead of calling `process::exit` lets the runtime drop the
// scanner tasks, which stops any scan still running on the controller.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_tracing(options.verbose);

    match run(options).await {
        Ok(_) => ExitCode::from(EXIT_SUCCESS),
        Err(why) => {
            tracing::error!("{why}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}
