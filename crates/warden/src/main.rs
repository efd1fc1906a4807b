//! Certwarden - Main entry point
//!
//! Inspect certificates, watch their expiry and keep them renewed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use certwarden::acme::CERT_FILE;
use certwarden::{inspect, AcmeClient, ExpiryMonitor, FileCertificate};
use certwarden_config::{Config, MonitorConfig};

/// Certwarden - TLS certificate lifecycle manager
#[derive(Parser, Debug)]
#[command(name = "certwarden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (.toml or .json)
    #[arg(short = 'c', long = "config", env = "CERTWARDEN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print certificate metadata as JSON
    Inspect {
        /// Certificate file
        cert: PathBuf,
    },
    /// Exit non-zero if the certificate is expired or expires within the threshold
    Check {
        /// Certificate file
        cert: PathBuf,

        /// Days before expiry that count as expiring
        #[arg(long = "threshold-days", default_value_t = 30)]
        threshold_days: u32,
    },
    /// Monitor expiry (and auto-renew when ACME is configured) until interrupted
    Monitor {
        /// Certificate file; defaults to the configured server or ACME certificate
        #[arg(long = "cert")]
        cert: Option<PathBuf>,
    },
    /// Obtain a certificate through ACME once and exit
    Obtain,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Inspect { cert } => inspect_certificate(&cert),
        Commands::Check {
            cert,
            threshold_days,
        } => check_certificate(&cert, threshold_days),
        Commands::Monitor { cert } => {
            let config = load_config(cli.config.as_deref())?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_monitor(config, cert))
        }
        Commands::Obtain => {
            let config = load_config(cli.config.as_deref())?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(obtain(config))
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::from_file(path).context("Failed to load configuration file")
        }
        None => bail!("No configuration file given (use --config or CERTWARDEN_CONFIG)"),
    }
}

fn inspect_certificate(cert: &Path) -> Result<()> {
    let metadata = inspect(cert).context("Failed to inspect certificate")?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

fn check_certificate(cert: &Path, threshold_days: u32) -> Result<()> {
    let metadata = inspect(cert).context("Failed to inspect certificate")?;

    if metadata.is_expired {
        println!(
            "certwarden: {} EXPIRED on {}",
            cert.display(),
            metadata.not_after
        );
        std::process::exit(2);
    }

    if metadata.days_until_expiration <= i64::from(threshold_days) {
        println!(
            "certwarden: {} expires in {} days (threshold {})",
            cert.display(),
            metadata.days_until_expiration,
            threshold_days
        );
        std::process::exit(1);
    }

    println!(
        "certwarden: {} valid for {} more days",
        cert.display(),
        metadata.days_until_expiration
    );
    Ok(())
}

/// Certificate to monitor: CLI arg > server TLS config > ACME certificate directory
fn monitored_path(config: &Config, cert: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(cert) = cert {
        return Ok(cert);
    }
    if let Some(server) = &config.server {
        return Ok(server.tls.cert_path.clone());
    }
    if let Some(acme) = &config.acme {
        return Ok(acme.cert_dir.join(CERT_FILE));
    }
    bail!("No certificate to monitor (use --cert or configure [server.tls] or [acme])")
}

async fn run_monitor(config: Config, cert: Option<PathBuf>) -> Result<()> {
    let cert_path = monitored_path(&config, cert)?;
    let monitor_config = config.monitor.clone().unwrap_or_else(MonitorConfig::default);

    let client = match &config.acme {
        Some(acme) if acme.auto_renew => {
            let client = Arc::new(AcmeClient::from_config(acme.clone()));
            client.start_auto_renewal();
            Some(client)
        }
        Some(_) => {
            warn!("ACME configured with auto_renew = false, monitoring only");
            None
        }
        None => None,
    };

    let monitor = ExpiryMonitor::start(
        Arc::new(FileCertificate::new(&cert_path)),
        monitor_config,
        Arc::new(()),
    )
    .context("Failed to start expiry monitor")?;

    info!(cert_path = %cert_path.display(), "Monitoring certificate, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    monitor.stop();
    if let Some(client) = client {
        client.stop_auto_renewal();
    }

    Ok(())
}

async fn obtain(config: Config) -> Result<()> {
    let acme = config
        .acme
        .context("No [acme] section in configuration")?;

    let client = AcmeClient::from_config(acme);
    let paths = client
        .obtain_certificates()
        .await
        .context("Certificate issuance failed")?;

    println!("certificate: {}", paths.cert.display());
    println!("private key: {}", paths.key.display());
    if let Some(ca) = &paths.ca {
        println!("CA bundle:   {}", ca.display());
    }

    Ok(())
}
