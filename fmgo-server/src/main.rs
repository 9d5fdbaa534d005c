//! fmgo-server: live AM/FM audio station for RTL-SDR tuners.
//!
//! Tunes the dongle through an `rtl_fm | sox | ffmpeg` pipeline and serves
//! the MP3 output, a JSON control API and a web front end over HTTP.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use fmgo_protocol::TuningRequest;

mod device;
mod logging;
mod pipeline;
mod session;
mod settings;
mod store;
mod web;

use device::RtlSdrDevice;
use pipeline::SubprocessSpawner;
use session::StreamController;
use settings::{DeviceSettings, PipelineSettings};
use store::{Store, StorePaths};

const CONFIG_FILE_NAME: &str = "fmgo.toml";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_RETENTION_DAYS: u64 = 7;

/// fmgo-server - RTL-SDR AM/FM audio station
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Installation directory (default: /opt/fm-go, else next to the binary)
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Address or host to listen on (port defaults to the station config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    log_retention_days: Option<u64>,

    /// Do not start streaming the saved frequency at startup
    #[arg(long)]
    no_autostart: bool,
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    logging: LoggingSection,
    #[serde(default)]
    pipeline: PipelineSettings,
    #[serde(default)]
    device: DeviceSettings,
}

#[derive(Debug, serde::Deserialize, Default)]
struct ServerSection {
    listen: Option<String>,
    autostart: Option<bool>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

fn load_config(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Explicit path, else `fmgo.toml` in the working or base directory.
fn find_config(explicit: Option<PathBuf>, base_dir: &Path) -> Option<PathBuf> {
    explicit.or_else(|| {
        [PathBuf::from(CONFIG_FILE_NAME), base_dir.join(CONFIG_FILE_NAME)]
            .into_iter()
            .find(|path| path.exists())
    })
}

/// `listen` may be a full socket address or just a host; a bare host gets
/// the station port.
fn resolve_listen_addr(listen: Option<&str>, port: u16) -> Result<SocketAddr, std::net::AddrParseError> {
    let listen = listen.unwrap_or(DEFAULT_HOST);
    match listen.parse::<SocketAddr>() {
        Ok(addr) => Ok(addr),
        Err(_) => Ok(SocketAddr::new(listen.parse::<IpAddr>()?, port)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let paths = StorePaths::detect(args.base_dir.clone())?;

    let file_config = match find_config(args.config.clone(), &paths.base_dir) {
        Some(config_path) => match load_config(&config_path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", config_path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        },
        None => ConfigFile::default(),
    };

    // Command line takes precedence over the file
    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| file_config.logging.log_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| paths.base_dir.join("logs"));
    let log_retention_days = args
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(DEFAULT_RETENTION_DAYS);
    logging::init_logging(
        &log_dir,
        log_retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;

    use log::{error, info, warn};

    info!("fmgo-server starting...");
    info!("  Base directory: {}", paths.base_dir.display());

    let store = Store::open(paths.clone())?;
    let station = store.config().clone();
    let store = Arc::new(tokio::sync::Mutex::new(store));

    let listen_addr = resolve_listen_addr(
        args.listen.as_deref().or(file_config.server.listen.as_deref()),
        station.port,
    )?;
    let autostart = !args.no_autostart && file_config.server.autostart.unwrap_or(true);

    let pipeline_settings = file_config.pipeline;
    let cold_stop = pipeline_settings.cold_stop_timeout();
    let controller = StreamController::new(
        Arc::new(RtlSdrDevice::new(file_config.device)),
        Arc::new(SubprocessSpawner::new(pipeline_settings.clone())),
        pipeline_settings,
    );

    info!("  Listen address: {}", listen_addr);
    info!("  Station: {} Hz, gain {}", station.frequency, station.gain);

    if autostart {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if !controller.device_present().await {
                info!("RTL-SDR not detected; waiting for a play request");
                return;
            }
            let request = match TuningRequest::new(station.frequency.into(), Some(station.gain)) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Saved frequency is not tunable: {}", e);
                    return;
                }
            };
            match controller.launch_at_startup(request, &station).await {
                Ok(report) => info!(
                    "Autostarted {} at {} Hz (gain {})",
                    report.band.name(),
                    report.frequency_hz,
                    report.gain
                ),
                Err(e) => warn!("Autostart failed: {}", e),
            }
        });
    }

    let web_state = Arc::new(web::WebState::new(
        Arc::clone(&controller),
        store,
        paths.frontend_dir.clone(),
    ));

    // Open streams would hold graceful shutdown, so the session ends first.
    let shutdown_controller = Arc::clone(&controller);
    let shutdown = async move {
        shutdown_signal().await;
        info!("Shutting down");
        shutdown_controller.stop(cold_stop).await;
    };

    if let Err(e) = web::start_web_server(listen_addr, web_state, shutdown).await {
        error!("Web server error: {}", e);
        controller.stop(cold_stop).await;
        return Err(e);
    }

    controller.stop(cold_stop).await;
    info!("fmgo-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_listen_addr() {
        assert_eq!(
            resolve_listen_addr(None, 8080).unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve_listen_addr(Some("127.0.0.1"), 9000).unwrap(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve_listen_addr(Some("[::1]:8181"), 9000).unwrap(),
            "[::1]:8181".parse::<SocketAddr>().unwrap()
        );
        assert!(resolve_listen_addr(Some("radio.local"), 9000).is_err());
    }

    #[test]
    fn test_config_file_sections() {
        let config: ConfigFile = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1"
            autostart = false

            [pipeline]
            am_offset_hz = -1500
            max_attempts = 3

            [device]
            usb_ids = ["0bda:2838"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.autostart, Some(false));
        assert_eq!(config.pipeline.am_offset_hz, -1500);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.pipeline.chunk_size, 32768);
        assert_eq!(config.device.usb_ids, vec!["0bda:2838".to_string()]);
        assert!(config.logging.level.is_none());
    }

    #[test]
    fn test_find_config_prefers_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("custom.toml");
        assert_eq!(find_config(Some(explicit.clone()), dir.path()), Some(explicit));

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "").unwrap();
        let found = find_config(None, dir.path()).unwrap();
        assert!(found.ends_with(CONFIG_FILE_NAME));
    }
}
