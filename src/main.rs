// kvirt-cpu-exporter - version 0.1.0
// Prometheus exporter for per-VM CPU utilization with tracing logging

mod accounting;
mod cli;
mod collector;
mod commands;
mod config;
mod error;
mod handlers;
mod metrics;
mod state;
mod virt;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::{routing::get, Router};
use clap::Parser;
use prometheus::Registry;
use tokio::{
    net::TcpListener,
    signal,
    sync::RwLock,
    time::interval,
};
use tracing::{debug, error, info, Level};

use crate::accounting::{clock_ticks_per_second, ProcSampler};
use crate::cli::{Args, Commands, LogLevel};
use crate::collector::VmCpuCollector;
use crate::config::{
    resolve_config, show_config, validate_effective_config, DEFAULT_BIND_ADDR,
    DEFAULT_COLLECT_INTERVAL_SECS, DEFAULT_METRICS_PATH, DEFAULT_PORT, DEFAULT_SAMPLE_WINDOW_MS,
};
use crate::handlers::{health_handler, index_handler, metrics_handler};
use crate::metrics::{ExporterTelemetry, VmCpuMetrics};
use crate::state::{AppState, CycleStatus, SharedState};
use crate::virt::VirshSource;

/// Initializes tracing logging subsystem with configured log level
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => Level::ERROR, // Off not fully supported, use ERROR as minimal
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Logging initialized with level: {:?}", args.log_level);
}

/// Runs one collection cycle and records its outcome in telemetry gauges
/// and the /health cycle status.
async fn run_cycle(collector: &mut VmCpuCollector, state: &SharedState) {
    let start = Instant::now();
    let result = collector.collect_cycle().await;
    let duration = start.elapsed().as_secs_f64();

    let mut status = state.cycle.write().await;
    status.cycles_total += 1;
    status.last_finished = Some(Instant::now());
    status.last_duration_seconds = duration;

    state.telemetry.cycle_duration.set(duration);

    match result {
        Ok(summary) => {
            status.last_success = true;
            status.vms_listed = summary.vms_listed;
            status.vms_published = summary.vms_published;
            state.telemetry.vms_total.set(summary.vms_published as f64);
            state.telemetry.cycle_success.set(1.0);
            debug!(
                "Collection cycle completed: {} listed, {} published, {:.3}s",
                summary.vms_listed, summary.vms_published, duration
            );
        }
        Err(e) => {
            // Cycle-fatal: no partial gauge updates happened; the existing
            // values keep serving scrapes until the next cycle succeeds.
            status.last_success = false;
            state.telemetry.cycle_success.set(0.0);
            error!("Collection cycle abandoned ({}): {}", e.kind(), e);
        }
    }
}

/// -------------------------------------------------------------------
/// MAIN APPLICATION ENTRY POINT
/// -------------------------------------------------------------------
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format);
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        return match command {
            Commands::Check { virsh, proc, all } => commands::command_check(*virsh, *proc, *all),
            Commands::Config { output, format } => {
                commands::command_config(output.clone(), *format)
            }
        };
    }

    // Load configuration for main server mode
    let config = resolve_config(&args)?;

    // Validate config before starting exporter
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    // Setup logging subsystem first to enable proper logging
    setup_logging(&args);

    info!("Starting kvirt-cpu-exporter");

    // The tick constant is required for every percentage computation; a
    // missing value is fatal to startup.
    let ticks_per_second =
        clock_ticks_per_second().context("cannot resolve scheduler tick constant")?;
    info!("Host scheduler resolution: {} ticks/second", ticks_per_second);

    // Determine bind ip and port from effective config
    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let metrics_path = config
        .metrics_path
        .clone()
        .unwrap_or_else(|| DEFAULT_METRICS_PATH.to_string());

    // Initialize Prometheus metrics registry
    let registry = Registry::new();
    debug!("Prometheus registry initialized");

    // Create and register all metric sets
    let vm_metrics = VmCpuMetrics::new(&registry)?;
    let telemetry = ExporterTelemetry::new(&registry)?;
    debug!("All metrics registered successfully");

    // Create shared application state
    let state: SharedState = Arc::new(AppState {
        registry,
        telemetry,
        cycle: RwLock::new(CycleStatus::default()),
        config: Arc::new(config.clone()),
    });

    let sample_window =
        Duration::from_millis(config.sample_window_ms.unwrap_or(DEFAULT_SAMPLE_WINDOW_MS));
    let mut collector = VmCpuCollector::new(
        Arc::new(VirshSource),
        ProcSampler::default(),
        vm_metrics,
        ticks_per_second,
        sample_window,
        config.prune_stale.unwrap_or(false),
    );

    // Perform initial collection cycle before starting server
    info!("Performing initial collection cycle");
    run_cycle(&mut collector, &state).await;

    // Start background collection task
    let bg_state = state.clone();
    let collect_interval = Duration::from_secs(
        config
            .collect_interval_secs
            .unwrap_or(DEFAULT_COLLECT_INTERVAL_SECS),
    );

    let background_task = tokio::spawn(async move {
        let mut int = interval(collect_interval);
        // The initial cycle already ran; skip the immediate first tick.
        int.tick().await;
        debug!(
            "Background collection task started with {}s interval",
            collect_interval.as_secs()
        );

        loop {
            int.tick().await;
            run_cycle(&mut collector, &bg_state).await;
        }
    });

    // Setup graceful shutdown signal handlers
    let shutdown_signal = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    };

    // Configure HTTP server routes and start listening
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let mut app = Router::new()
        .route("/", get(index_handler))
        .route(&metrics_path, get(metrics_handler));

    // Conditionally add health endpoint
    if config.enable_health.unwrap_or(true) {
        app = app.route("/health", get(health_handler));
    }

    let app = app.with_state(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!(
        "kvirt-cpu-exporter listening on http://{}:{}{}",
        bind_ip_str, port, metrics_path
    );

    // Start HTTP server with graceful shutdown capability
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown signal received, exiting...");
        }
    }

    // Cleanup: cancel background task before exit
    background_task.abort();
    let _ = background_task.await;

    info!("kvirt-cpu-exporter stopped gracefully");
    Ok(())
}
