//! CGR Diameter Agent daemon
//!
//! Terminates Diameter credit control from network elements and turns each
//! request into session service calls through the configured request
//! processors.

mod sessions;

use anyhow::{Context, Result};
use cgr_diameter::{CgrConfig, DiameterAgent, DiameterListener, Dictionary};
use clap::Parser;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sessions::StaticSessions;

/// CGR Diameter Agent
#[derive(Parser, Debug)]
#[command(name = "cgr-diameterd")]
#[command(author = "NextGCore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Diameter credit control agent", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, default_value = "/etc/cgrates/diameter_agent.yaml")]
    config: String,

    /// Log file path
    #[arg(short = 'l', long)]
    log_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'e', long, default_value = "info")]
    log_level: String,

    /// Disable color output
    #[arg(short = 'm', long)]
    no_color: bool,

    /// Listen address, overrides the configuration
    #[arg(long)]
    listen: Option<String>,

    /// Extra dictionary directory, overrides the configuration
    #[arg(long)]
    dictionaries: Option<String>,

    /// Largest usage granted per request, in seconds
    #[arg(long, default_value = "3600")]
    max_usage: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    log::info!("CGR Diameter Agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let running = Arc::new(AtomicBool::new(true));
    setup_signal_handlers(running.clone())?;

    let cfg = load_config(&args)?;
    if !cfg.diameter_agent.enabled {
        log::warn!("Diameter agent is disabled in {}", args.config);
        return Ok(());
    }

    let mut dict = Dictionary::builtin().context("Failed to load built-in dictionaries")?;
    let dict_path = &cfg.diameter_agent.dictionaries_path;
    if !dict_path.is_empty() {
        let n = dict
            .load_dir(Path::new(dict_path))
            .with_context(|| format!("Failed to load dictionaries from {dict_path}"))?;
        log::info!("Loaded {n} dictionary files from {dict_path}");
    }

    let sessions = Arc::new(StaticSessions::new(Duration::from_secs(args.max_usage)));
    let agent = Arc::new(
        DiameterAgent::new(&cfg, Arc::new(dict), sessions).context("Failed to initialize Diameter agent")?,
    );
    log::info!(
        "Diameter agent {}@{} initialized",
        agent.local_peer().origin_host,
        agent.local_peer().origin_realm
    );

    let listen_addr = cfg.diameter_agent.listen_addr()?;
    let listener = DiameterListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {listen_addr}"))?;

    log::info!("CGR Diameter Agent ready");
    agent.serve(listener, running).await?;

    log::info!("CGR Diameter Agent stopped");
    Ok(())
}

/// Read the configuration file and apply command line overrides
fn load_config(args: &Args) -> Result<CgrConfig> {
    let mut cfg = if Path::new(&args.config).exists() {
        log::info!("Loading configuration from {}", args.config);
        CgrConfig::load(Path::new(&args.config))
            .with_context(|| format!("Failed to parse config {}", args.config))?
    } else {
        log::warn!("Configuration file not found: {}. Using defaults.", args.config);
        let mut cfg = CgrConfig::default();
        cfg.diameter_agent.enabled = true;
        cfg
    };

    if let Some(listen) = &args.listen {
        cfg.diameter_agent.listen = listen.clone();
    }
    if let Some(dir) = &args.dictionaries {
        cfg.diameter_agent.dictionaries_path = dir.clone();
    }
    cfg.validate().context("Invalid configuration")?;
    Ok(cfg)
}

/// Initialize logging based on command line arguments
fn init_logging(args: &Args) -> Result<()> {
    let mut builder = env_logger::Builder::new();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };
    builder.filter_level(level);
    builder.format_timestamp_millis();

    if args.no_color {
        builder.write_style(env_logger::WriteStyle::Never);
    }

    if let Some(path) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();

    Ok(())
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default() {
        let args = Args::parse_from(["cgr-diameterd"]);
        assert_eq!(args.config, "/etc/cgrates/diameter_agent.yaml");
        assert_eq!(args.log_level, "info");
        assert_eq!(args.max_usage, 3600);
        assert!(args.listen.is_none());
        assert!(!args.no_color);
    }

    #[test]
    fn test_args_custom() {
        let args = Args::parse_from([
            "cgr-diameterd",
            "-c", "/custom/agent.yaml",
            "-e", "debug",
            "-m",
            "--listen", "0.0.0.0:3869",
            "--dictionaries", "/usr/share/cgrates/diameter/dict",
            "--max-usage", "300",
        ]);
        assert_eq!(args.config, "/custom/agent.yaml");
        assert_eq!(args.log_level, "debug");
        assert!(args.no_color);
        assert_eq!(args.listen.as_deref(), Some("0.0.0.0:3869"));
        assert_eq!(args.dictionaries.as_deref(), Some("/usr/share/cgrates/diameter/dict"));
        assert_eq!(args.max_usage, 300);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(Args::try_parse_from(["cgr-diameterd", "-k"]).is_err());
    }

    #[test]
    fn test_missing_config_uses_defaults_with_overrides() {
        let args = Args::parse_from([
            "cgr-diameterd",
            "-c", "/nonexistent/agent.yaml",
            "--listen", "127.0.0.1:13868",
        ]);
        let cfg = load_config(&args).unwrap();
        assert!(cfg.diameter_agent.enabled);
        assert_eq!(cfg.diameter_agent.listen_addr().unwrap().port(), 13868);
    }

    #[test]
    fn test_invalid_listen_override_is_rejected() {
        let args = Args::parse_from(["cgr-diameterd", "-c", "/nonexistent/agent.yaml", "--listen", "nowhere"]);
        assert!(load_config(&args).is_err());
    }
}
