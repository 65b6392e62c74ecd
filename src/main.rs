//! CLI entry point for the SCPI script player.
//!
//! # Usage
//!
//! ```bash
//! vp setup.scpi
//! vp --resource "TCPIP::192.168.1.20::5025::SOCKET" --timeout-ms 5000 setup.scpi
//! vp --dry-run setup.scpi
//! ```
//!
//! The transcript goes to stdout, logs to stderr.

use clap::Parser;
use scpi_player::config::{ErrorPolicy, PlayerConfig};
use scpi_player::error::{PlayerError, PlayerResult};
use scpi_player::logging::{self, OutputFormat};
use scpi_player::player::{open_script, run_script};
use scpi_player::transport::{self, Backend, MockBackend, ResourceId};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "vp", version)]
#[command(about = "Replay a script of SCPI directives against an instrument", long_about = None)]
struct Cli {
    /// Script file, one directive per line
    script: PathBuf,

    /// Configuration file (default: config/player.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instrument resource, e.g. TCPIP::169.254.56.79::5025::SOCKET
    #[arg(long)]
    resource: Option<String>,

    /// Response timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<OutputFormat>,

    /// What to do when a write or read fails
    #[arg(long, value_enum)]
    on_error: Option<ErrorPolicy>,

    /// Play against a simulated instrument instead of real hardware
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    /// Command-line values win over every other configuration source.
    fn apply(&self, config: &mut PlayerConfig) {
        if let Some(resource) = &self.resource {
            config.transport.resource = ResourceId::new(resource.clone());
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.transport.timeout_ms = timeout_ms;
        }
        if let Some(level) = &self.log_level {
            config.application.log_level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.application.log_format = format;
        }
        if let Some(policy) = self.on_error {
            config.playback.on_transport_error = policy;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            err.print().ok();
            return if err.use_stderr() {
                ExitCode::from(PlayerError::Usage.exit_code())
            } else {
                // --help and --version
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "run failed");
            eprintln!("{}", err);
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(cli: Cli) -> PlayerResult<()> {
    // A bad script path is reported before any configuration problem.
    drop(open_script(&cli.script).await?);

    let mut config = PlayerConfig::load_from(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    logging::init_from_config(&config)?;
    info!(
        name = %config.application.name,
        resource = %config.transport.resource,
        dry_run = cli.dry_run,
        "starting playback"
    );

    let backend: Box<dyn Backend> = if cli.dry_run {
        Box::new(MockBackend::simulated_instrument())
    } else {
        transport::backend_for(&config.transport.resource, config.transport.baud_rate)
    };

    run_script(&config, &cli.script, backend, std::io::stdout()).await?;
    Ok(())
}
