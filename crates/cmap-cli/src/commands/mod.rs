use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::PathBuf;
use std::time::Duration;

use cmap_config::{AgencyConfig, ConfigLoader, WarningSeverity};
use cmap_core::{AgencyError, Result};
use cmap_runtime::{BehaviorRegistry, serve_agent};

mod start;

/// cmap agency: runs agents and routes their messages across the cluster
#[derive(Parser)]
#[command(name = "cmap-agency", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to agency.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the agency, start its agents and serve the control API
    Start {
        /// Run agents without the control API
        #[arg(long)]
        no_server: bool,
        /// Override the control API listen address
        #[arg(short = 'L', long)]
        listen: Option<String>,
    },
    /// Show the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate configuration and check that the directory is reachable
    Doctor,
    /// Show version and build info
    Version,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Run one agent, speaking the frame protocol on stdin/stdout
    #[command(hide = true)]
    Agent,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Config first: it decides the log level and format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let mut config = config_loader.get();

        let log_level = self.log_level(&config);
        // An agent process owns stdout for its frames.
        let to_stderr = matches!(self.command, Commands::Agent);
        init_tracing(&log_level, &config.logging.format, to_stderr);

        match self.command {
            Commands::Start { no_server, listen } => {
                if let Some(listen) = listen {
                    config.server.listen = listen;
                }
                start::cmd_start(config, no_server).await
            }
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Doctor => Self::cmd_doctor(config).await,
            Commands::Version => Self::cmd_version(),
            Commands::Completions { shell } => Self::cmd_completions(shell),
            Commands::Agent => Self::cmd_agent(config).await,
        }
    }

    /// --verbose > --quiet > --log-level > config
    fn log_level(&self, config: &AgencyConfig) -> String {
        if self.verbose {
            "debug".into()
        } else if self.quiet {
            "error".into()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| config.logging.level.clone())
        }
    }

    fn cmd_config(config: AgencyConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| AgencyError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    async fn cmd_doctor(config: AgencyConfig) -> Result<()> {
        println!("cmap doctor: configuration audit");
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{e}");
                return Ok(());
            }
        };
        let warn_count = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Warning)
            .count();
        for w in &warnings {
            println!("  {w}");
        }

        let timeout = Duration::from_secs(config.directory.timeout_secs);
        let reachable = probe(&config.directory.url, timeout).await;
        match &reachable {
            Ok(status) => println!("  ok: directory {} answered {status}", config.directory.url),
            Err(e) => println!("  error: directory {} unreachable: {e}", config.directory.url),
        }
        if config.logger.enabled {
            match probe(&config.logger.url, timeout).await {
                Ok(status) => println!("  ok: logger {} answered {status}", config.logger.url),
                Err(e) => println!("  error: logger {} unreachable: {e}", config.logger.url),
            }
        }

        println!();
        println!(
            "  {warn_count} warnings, directory {}",
            if reachable.is_ok() { "reachable" } else { "unreachable" }
        );
        Ok(())
    }

    fn cmd_version() -> Result<()> {
        println!("cmap-agency v{}", env!("CARGO_PKG_VERSION"));
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }

    async fn cmd_agent(config: AgencyConfig) -> Result<()> {
        let registry = BehaviorRegistry::builtin().with_default(&config.agency.default_behavior);
        serve_agent(&registry, tokio::io::stdin(), tokio::io::stdout()).await
    }

    fn cmd_completions(shell: Shell) -> Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "cmap-agency", &mut std::io::stdout());
        Ok(())
    }
}

fn init_tracing(level: &str, format: &str, to_stderr: bool) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    let writer = move || -> Box<dyn std::io::Write> {
        if to_stderr {
            Box::new(std::io::stderr())
        } else {
            Box::new(std::io::stdout())
        }
    };
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(writer)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(writer)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(writer)
            .with_target(false)
            .init(),
    }
}

/// Any HTTP answer counts as reachable.
async fn probe(url: &str, timeout: Duration) -> Result<reqwest::StatusCode> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AgencyError::Directory(e.to_string()))?;
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| AgencyError::Directory(e.to_string()))?;
    Ok(resp.status())
}
