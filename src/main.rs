mod config;
#[cfg(unix)]
mod daemon;
mod heartbeat;
mod journal;
mod logging;
mod server;
mod session;
mod shutdown;
mod wire;
mod workers;

use std::process;
use std::sync::Arc;

use config::AppConfig;
use heartbeat::Heartbeat;
use journal::Journal;
use logging::{LogLevel, Logger, LoggerConfig};
use serde_json::json;
use server::TcpAcceptor;
use shutdown::ShutdownHooks;
use workers::WorkerRegistry;

fn main() {
    ensure_posix_or_exit();
    print_startup_banner();

    let app_config = load_config_or_exit();
    let log_level = LogLevel::from_config_value(&app_config.logging.level).unwrap_or_else(|| {
        eprintln!(
            "invalid logging.level '{}'. Allowed values: error, warn, info, debug",
            app_config.logging.level
        );
        process::exit(2);
    });
    let logger = Arc::new(Logger::new(LoggerConfig {
        min_level: log_level,
        human_friendly: app_config.logging.human_friendly,
    }));

    let shutdown_hooks = ShutdownHooks::install().unwrap_or_else(|error| {
        eprintln!("failed to install shutdown hooks: {error}");
        process::exit(2);
    });
    let shutdown = shutdown_hooks.flag();
    logger.info(
        Some("main::shutdown"),
        "Shutdown hooks installed for SIGINT/SIGTERM",
    );

    let journal = Arc::new(Journal::at(app_config.journal.path.clone()));

    let acceptor = TcpAcceptor::from_app_config(&app_config).unwrap_or_else(|error| {
        eprintln!("server startup error: {error}");
        process::exit(2);
    });
    let bound_addr = acceptor.local_addr().unwrap_or_else(|error| {
        eprintln!("server startup error: failed to read local address: {error}");
        process::exit(2);
    });
    logger.log(
        LogLevel::Info,
        Some("main::server"),
        &format!(
            "{} v{} listening for newline-delimited packets",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
        Some(json!({
            "bind_address": bound_addr.to_string(),
            "backlog": app_config.server.backlog,
            "journal_path": app_config.journal.path,
            "daemon": app_config.server.daemon
        })),
    );

    // Detach after bind so a failed bind is still reported to the caller's
    // terminal; worker threads start only in the daemonized child.
    #[cfg(unix)]
    if app_config.server.daemon {
        if let Err(error) = daemon::daemonize() {
            eprintln!("daemonization failed: {error}");
            process::exit(2);
        }
    }

    let mut heartbeat = Heartbeat::new(
        Arc::clone(&journal),
        Arc::clone(&logger),
        shutdown.clone(),
        app_config.heartbeat,
    )
    .unwrap_or_else(|error| {
        eprintln!("heartbeat configuration error: {error}");
        process::exit(2);
    });
    heartbeat.start().expect("heartbeat should start");
    logger.log(
        LogLevel::Info,
        Some("main::heartbeat"),
        "Heartbeat started",
        Some(json!({ "interval_ms": app_config.heartbeat.interval_ms })),
    );

    let registry = WorkerRegistry::new();
    acceptor.run(&journal, &registry, &shutdown, &logger);

    // The accept loop returns once per process lifetime, so this cleanup
    // sequence runs exactly once however many signals arrive.
    logger.info(Some("main::shutdown"), "Caught signal, exiting");
    drop(acceptor);
    registry.join_all();
    if let Err(error) = heartbeat.stop() {
        logger.warn(
            Some("main::shutdown"),
            &format!("heartbeat stop failed: {error}"),
        );
    }
    if let Err(error) = journal.remove() {
        logger.warn(
            Some("main::shutdown"),
            &format!("journal removal failed: {error}"),
        );
    }
    logger.info(
        Some("main::shutdown"),
        "All workers joined, journal removed, shutdown completed",
    );
}

fn load_config_or_exit() -> AppConfig {
    match AppConfig::load_with_discovery(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            process::exit(2);
        }
    }
}

fn ensure_posix_or_exit() {
    if !cfg!(unix) {
        eprintln!("unsupported platform: sockline is intended for POSIX systems");
        process::exit(2);
    }
}

fn print_startup_banner() {
    println!(
        "{} v{} | build {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("SOCKLINE_BUILD_DATE_UTC")
    );
    println!("Newline-delimited TCP journal server with full-log echo.");
    println!();
}
