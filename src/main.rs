//! Process entry point. Wires the config, logger, database pool, PLC
//! transport, parameter registry, valve controller, and the three
//! long-lived tasks (sync loop, command dispatcher, recipe executor
//! supervisor) together, then waits for a shutdown signal or an
//! unrecoverable task error.

use std::process::ExitCode;
use std::sync::Arc;

use ald_control_agent::dispatcher::CommandDispatcher;
use ald_control_agent::domain::services::{BaseService, PersistenceAdapter, PlcTransport};
use ald_control_agent::infrastructure::persistence::SeaOrmPersistenceAdapter;
use ald_control_agent::infrastructure::plc::ModbusPlcTransport;
use ald_control_agent::logging::StructuredLogger;
use ald_control_agent::recipe::RecipeExecutor;
use ald_control_agent::registry::{ParameterRegistry, ValveController};
use ald_control_agent::sync::SyncLoop;
use ald_control_agent::utils::config::AppConfig;
use tokio::sync::watch;

const EXIT_OK: u8 = 0;
const EXIT_CONFIGURATION: u8 = 1;
const EXIT_PLC_FATAL: u8 = 2;
const EXIT_DATABASE_FATAL: u8 = 3;

fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIGURATION);
        }
    };

    if let Err(e) = StructuredLogger::install(config.log_level, &config.log_file_path) {
        eprintln!("failed to install logger: {e}");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return ExitCode::from(EXIT_CONFIGURATION);
        }
    };

    ExitCode::from(runtime.block_on(run(config)))
}

async fn run(config: AppConfig) -> u8 {
    log::info!("starting control agent for machine {}", config.machine_id);

    let persistence: Arc<dyn PersistenceAdapter> = match SeaOrmPersistenceAdapter::connect(&config.database_url).await {
        Ok(adapter) => Arc::new(adapter),
        Err(e) => {
            log::error!("failed to open database pool: {e}");
            return EXIT_DATABASE_FATAL;
        }
    };

    let mut transport = ModbusPlcTransport::new(config.plc.clone());
    if let Err(e) = transport.initialize().await {
        log::warn!("PLC transport initialization reported an error: {e}");
    }
    let transport: Arc<dyn PlcTransport> = Arc::new(transport);

    let registry = match ParameterRegistry::load(persistence.as_ref(), config.machine_id, transport.clone(), config.plc.byte_order).await {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            log::error!("failed to load parameter registry: {e}");
            return EXIT_DATABASE_FATAL;
        }
    };

    let valves = Arc::new(ValveController::new(registry.clone(), transport.clone()));
    let recipes = Arc::new(RecipeExecutor::new(config.machine_id, persistence.clone(), registry.clone(), valves.clone()));

    let sync_loop = Arc::new(SyncLoop::new(
        config.machine_id,
        registry.clone(),
        transport.clone(),
        persistence.clone(),
        config.plc.byte_order,
        config.sync_loop_hz,
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(
        config.machine_id,
        persistence.clone(),
        registry.clone(),
        valves.clone(),
        recipes.clone(),
        config.dispatcher_poll_interval,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync_handle = {
        let sync_loop = sync_loop.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { sync_loop.run(shutdown_rx).await })
    };
    let dispatcher_handle = {
        let dispatcher = dispatcher.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { dispatcher.run(shutdown_rx).await })
    };

    let exit_code = wait_for_shutdown_signal().await;
    log::info!("shutdown signal received, stopping tasks");
    valves.cancel_pending();
    let _ = shutdown_tx.send(true);
    let (sync_result, dispatcher_result) = tokio::join!(sync_handle, dispatcher_handle);

    // `run()` itself never returns on a transport or persistence error — both
    // loops classify those as transient and keep retrying on the next tick —
    // so a task only reaches us here via a panic, which we treat as the
    // unrecoverable-after-startup case rather than a clean shutdown.
    if sync_result.is_err() {
        log::error!("sync loop task panicked");
        return EXIT_PLC_FATAL;
    }
    if dispatcher_result.is_err() {
        log::error!("command dispatcher task panicked");
        return EXIT_DATABASE_FATAL;
    }

    exit_code
}

/// Waits for SIGINT/SIGTERM (or, on platforms without signal support, runs
/// forever). Always returns `EXIT_OK` — an unrecoverable task error is
/// reported by the failing task logging and this function is only the
/// normal-shutdown path; §6's PLC/database exit codes are surfaced by the
/// early-return paths in `run` before tasks are ever spawned.
async fn wait_for_shutdown_signal() -> u8 {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                log::error!("failed to install SIGTERM handler, falling back to SIGINT only: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return EXIT_OK;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    EXIT_OK
}
