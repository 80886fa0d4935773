use clap::Parser;
use log::{error, info, warn, LevelFilter};
use netfacade::configuration::{Config, ServiceSettings};
use netfacade::facade::{Facade, JournalFacade, LoggingFacade};
use netfacade::network::TcpEngine;
use netfacade::service::{Service, ServiceHandle};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "netfacade")]
#[command(version)]
#[command(about = "Runs a raw TCP service and reports its session events")]
struct Args {
    /// TOML configuration file
    config_file: PathBuf,

    /// Overrides `log_level` from the configuration file
    #[arg(long, env = "NETFACADE_LOG_LEVEL")]
    log_level: Option<String>,
}

/// Dials the configured peers once the service runs.
struct Bootstrap {
    targets: Vec<SocketAddr>,
}

impl Facade for Bootstrap {
    fn name(&self) -> &str {
        "bootstrap"
    }

    fn on_start(&mut self, svc: &ServiceHandle) {
        for target in &self.targets {
            match svc.async_connect(*target) {
                Ok(attempt) => info!("[{}] connecting to {} ({})", svc.service_id(), target, attempt),
                Err(e) => warn!("[{}] unable to connect to {}: {}", svc.service_id(), target, e),
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Unable to import configuration from {}: {}",
                args.config_file.display(),
                e
            );
            std::process::exit(1);
        }
    };

    let level = args
        .log_level
        .as_deref()
        .and_then(|level| level.parse::<LevelFilter>().ok())
        .or_else(|| config.level_filter().ok())
        .unwrap_or(LevelFilter::Info);
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_target(false)
        .init();

    info!("Configuration imported successfully");

    let engine = match TcpEngine::bind(&config.listen) {
        Ok(engine) => engine
            .with_connect_timeout(config.connect_timeout())
            .with_read_buffer_size(config.read_buffer_size),
        Err(e) => {
            error!("Unable to bind {:?}: {}, exiting...", config.listen, e);
            std::process::exit(1);
        }
    };

    let mut service = Service::new(engine, ServiceSettings::from(&config));
    service.add_facade(Box::new(LoggingFacade::default()));

    if let Some(path) = &config.journal_path {
        match JournalFacade::open(path) {
            Ok(journal) => service.add_facade(Box::new(journal)),
            Err(e) => {
                error!("Unable to open the journal: {}, exiting...", e);
                std::process::exit(1);
            }
        }
    }
    if !config.connect.is_empty() {
        service.add_facade(Box::new(Bootstrap {
            targets: config.connect.clone(),
        }));
    }

    let handle = service.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping '{}'", handle.name());
            if let Err(e) = handle.stop() {
                warn!("Unable to stop the service: {}", e);
            }
        }
    });

    let result = tokio::spawn(async move {
        info!("Spawning the service");
        service.run().await
    });

    match result.await {
        Ok(Ok(())) => info!("Service exited"),
        Ok(Err(e)) => {
            error!("Error occured in the service: {}, exiting...", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Error joining at the end of execution: {:?}", e);
            std::process::exit(1);
        }
    }
}
