//! scan-relay - scanner button daemon
//!
//! Bridges scanner hardware events (scan button, page loaded) reported by
//! `scanbd` to a scan, PDF assembly and upload pipeline. The daemon borrows
//! the scanner from `scanbd` for each scan and always hands it back.
//!
//! # Architecture
//!
//! * [`events`]: event channel and its producers (trigger files, signals)
//! * [`dispatcher`]: the manual / automatic-feed state machine
//! * [`device`]: ownership handshake, discovery and the SANE backend
//! * [`capture`]: one exclusive scan-and-save per call
//! * [`finalize`]: document counter, assembly and upload
//! * [`config`], [`cli`], [`logging`], [`signal`], [`error`]: application
//!   plumbing

pub mod capture;
pub mod cli;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod finalize;
pub mod logging;
pub mod session;
pub mod signal;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::capture::ScanExecutor;
use crate::cli::{Cli, Commands, RunArgs};
use crate::config::Config;
use crate::device::discovery::enumerate_once;
use crate::device::{
    discover_device, DeviceArbiter, DiscoveryConfig, DiscoveryError, ProcessSignalLink,
    ScanimageBackend,
};
use crate::dispatcher::Dispatcher;
use crate::error::{DaemonError, ExitCode};
use crate::events::{spawn_signal_listener, spawn_trigger_watcher, ProducerSet, TriggerFiles};
use crate::finalize::upload::{read_device_id, UNKNOWN_DEVICE_ID};
use crate::finalize::{
    BackendUrl, CounterStore, HttpUploader, Img2PdfAssembler, SessionFinalizer, Uploader,
};
use crate::signal::ShutdownHandler;

/// Run the command selected on the command line.
///
/// # Errors
///
/// Returns an error for invalid configuration or an unanticipated daemon
/// failure. Scan, assembly and upload failures are logged, not returned.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::Success)
        }
        Commands::Devices => list_devices(&config),
        Commands::Run(args) => {
            apply_run_args(&mut config, &args);
            run_daemon(&config)
        }
    }
}

/// Apply `run` flags on top of the loaded configuration.
pub fn apply_run_args(config: &mut Config, args: &RunArgs) {
    if args.no_upload {
        config.upload.enabled = false;
    }
    if args.no_signals {
        config.events.listen_signals = false;
    }
    if let Some(url) = &args.backend_url {
        config.upload.backend_url = Some(url.clone());
    }
}

fn build_arbiter(config: &Config) -> DeviceArbiter {
    DeviceArbiter::new(Box::new(ProcessSignalLink::new(
        &config.arbitration.process,
        &config.arbitration.acquire_signal,
        &config.arbitration.release_signal,
    )))
}

fn build_backend(config: &Config) -> ScanimageBackend {
    ScanimageBackend::new(&config.scanner.program)
        .with_extra_args(config.scanner.extra_args.clone())
}

/// Build the finalizer described by `config`.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be created.
pub fn build_finalizer(config: &Config) -> Result<SessionFinalizer> {
    let uploader: Option<Box<dyn Uploader>> = if config.upload.enabled {
        let backend = match &config.upload.backend_url {
            Some(url) => BackendUrl::Fixed(url.clone()),
            None => BackendUrl::File(config.upload.backend_url_file.clone()),
        };
        let device_id = config
            .upload
            .device_id
            .clone()
            .or_else(|| read_device_id(&config.upload.cpuinfo_path))
            .unwrap_or_else(|| {
                log::warn!(
                    "No serial number in {}, uploading as device `{}`",
                    config.upload.cpuinfo_path.display(),
                    UNKNOWN_DEVICE_ID
                );
                UNKNOWN_DEVICE_ID.to_string()
            });
        let http = HttpUploader::new(
            backend,
            device_id,
            Duration::from_secs(config.upload.timeout_secs),
        )
        .context("Failed to create HTTP client")?;
        log::info!("Uploading documents as device {}", http.device_id());
        let uploader: Box<dyn Uploader> = Box::new(http);
        Some(uploader)
    } else {
        log::info!("Upload disabled");
        None
    };

    Ok(SessionFinalizer::new(
        CounterStore::new(&config.document.counter_dir),
        Box::new(Img2PdfAssembler::new(&config.document.assembler)),
        uploader,
    )
    .with_document_prefix(&config.document.prefix))
}

fn list_devices(config: &Config) -> Result<ExitCode> {
    let arbiter = build_arbiter(config);
    let devices = enumerate_once(&arbiter, &build_backend(config))?;
    if devices.is_empty() {
        println!("No scanners found.");
    }
    for device in devices {
        println!("{}", device);
    }
    Ok(ExitCode::Success)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run the daemon until a shutdown request or a fatal failure.
///
/// Scanner control is released before this returns on every path,
/// including a panic inside the daemon.
///
/// # Errors
///
/// Returns an error for unanticipated failures; the caller should exit
/// non-zero.
pub fn run_daemon(config: &Config) -> Result<ExitCode> {
    log::info!("Starting scanner monitor");
    let shutdown = signal::install_handler().context("Failed to install signal handler")?;
    let arbiter = Arc::new(build_arbiter(config));

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        daemon_loop(config, &arbiter, &shutdown)
    }));

    if arbiter.release_if_held() {
        log::info!("Scanner control returned during shutdown");
    }

    match result {
        Ok(outcome) => outcome,
        Err(payload) => Err(anyhow::anyhow!(
            "daemon panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn daemon_loop(
    config: &Config,
    arbiter: &Arc<DeviceArbiter>,
    shutdown: &ShutdownHandler,
) -> Result<ExitCode> {
    let backend = build_backend(config);
    let discovery = DiscoveryConfig::default()
        .with_backoff(Duration::from_secs(config.discovery.backoff_secs))
        .with_shutdown_flag(shutdown.get_flag());

    let device = match discover_device(arbiter, &backend, &discovery) {
        Ok(device) => device,
        Err(DiscoveryError::Interrupted { attempts }) => {
            log::info!("Shutdown requested during discovery ({} attempts)", attempts);
            return Ok(ExitCode::Success);
        }
        Err(e) => return Err(DaemonError::from(e).into()),
    };

    let finalizer = build_finalizer(config)?;
    let executor = ScanExecutor::new(Arc::clone(arbiter), Box::new(backend), device);
    let mut dispatcher = Dispatcher::new(executor, finalizer, &config.scanner.session_root);

    let (tx, rx) = events::channel();
    shutdown.attach(tx.clone());
    let producers = ProducerSet::new(tx);

    let files = TriggerFiles {
        manual: config.events.scan_trigger_file.clone(),
        page_feed: config.events.page_loaded_file.clone(),
    };
    files.clear_stale();
    let watcher = spawn_trigger_watcher(
        files,
        Duration::from_millis(config.events.poll_interval_ms),
        producers.register("trigger-files"),
        shutdown.get_flag(),
    )
    .context("Failed to start trigger file watcher")?;

    let listener = if config.events.listen_signals {
        Some(
            spawn_signal_listener(producers.register("event-signals"))
                .context("Failed to register event signals")?,
        )
    } else {
        None
    };

    let outcome = dispatcher.run(&rx, shutdown);

    // Stop the producers whatever the outcome.
    shutdown.request_shutdown();
    shutdown.detach();
    if let Some(listener) = listener {
        listener.stop();
    }
    if watcher.join().is_err() {
        log::warn!("Trigger file watcher panicked");
    }

    let reason = outcome?;
    log::info!("Scanner monitor stopped ({:?})", reason);
    Ok(ExitCode::Success)
}
