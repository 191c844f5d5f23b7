//! The PACS server front-end.
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, Level};

use ferrodicom_pacs::config::{Config, ConfigError};
use ferrodicom_pacs::server::ServeError;
use ferrodicom_pacs::PacsServer;

/// A DICOM storage and query/retrieve node
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// the port to listen on (overrides the configuration)
    #[arg(short, long)]
    port: Option<u16>,
    /// this node's AE title (overrides the configuration)
    #[arg(long = "ae-title")]
    ae_title: Option<String>,
    /// the storage root (overrides the configuration)
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,
    /// verbose mode
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

const EXIT_USAGE: u8 = 2;
const EXIT_IO: u8 = 3;

fn main() -> ExitCode {
    let app = App::parse();

    let mut config = match &app.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e @ ConfigError::ReadFile { .. }) => {
                eprintln!("ferropacs: {}", e);
                return ExitCode::from(EXIT_IO);
            }
            Err(e) => {
                eprintln!("ferropacs: {}", e);
                return ExitCode::from(EXIT_USAGE);
            }
        },
        None => Config::default(),
    };
    if let Some(port) = app.port {
        config.port = port;
    }
    if let Some(ae_title) = app.ae_title {
        config.ae_title = ae_title;
    }
    if let Some(data_dir) = app.data_dir {
        config.data_directory = data_dir;
    }
    if app.verbose {
        config.verbose = true;
    }

    if let Err(e) = init_logging(&config) {
        eprintln!("ferropacs: {}", e);
        return ExitCode::from(EXIT_IO);
    }

    let server = match PacsServer::new(config) {
        Ok(server) => server,
        Err(e @ ServeError::Configuration { .. }) => {
            error!("{}", e);
            return ExitCode::from(EXIT_USAGE);
        }
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_IO);
        }
    };

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(EXIT_IO)
        }
    }
}

fn init_logging(config: &Config) -> std::io::Result<()> {
    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        None => {
            let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
    Ok(())
}
