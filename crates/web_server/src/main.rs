//! Main entry point for the Campsite Tracker backend server.
//! This crate provides the trip REST API and runs availability scans in the background.

mod config;
mod scan_manager;

use std::sync::Arc;

use actix_web::{App, HttpServer, middleware::Logger, web};
use campground_scan::{FetchConfig, LocalSnapshotStore, RecGovClient, ScanExecutor};
use postgres::PgRecordStore;
use postgres::database::*;
use trip_services::{ProcedureOrchestrator, RecordStore, TripAvailabilityUpdater};
use web_handlers::*;

use crate::config::ServerConfig;
use crate::scan_manager::ScanManager;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    log::info!("Starting campsite tracker server...");

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Create database connection pool
    let pool = match create_connection_pool(&config.database_url).await {
        Ok(pool) => {
            log::info!("Database pool created successfully");

            if let Err(e) = test_connection(&pool).await {
                log::error!("Database connection test failed: {}", e);
            }
            pool
        }
        Err(e) => {
            log::error!("Failed to create database pool: {}", e);
            std::process::exit(1);
        }
    };

    let record_store = PgRecordStore::new(pool);
    if let Err(e) = record_store.ensure_schema().await {
        log::error!("Failed to prepare records table: {}", e);
        std::process::exit(1);
    }
    let record_store: Arc<dyn RecordStore> = Arc::new(record_store);

    let orchestrator = Arc::new(ProcedureOrchestrator::new(record_store.clone()));

    // Wire the scan pipeline
    let fetch_config = FetchConfig::default();
    let fetcher = match RecGovClient::new(&fetch_config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::error!("Failed to create recreation.gov client: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("Snapshots stored in {}", config.snapshot_dir.display());

    let executor = Arc::new(ScanExecutor::new(
        fetcher,
        Arc::new(LocalSnapshotStore::new(&config.snapshot_dir)),
        Arc::new(TripAvailabilityUpdater::new(orchestrator.clone())),
        fetch_config,
        Some(config.scan.clone()),
    ));

    let mut scan_manager = ScanManager::new(executor, record_store, config.scan.scan_interval);
    scan_manager.start();

    log::info!("Server will be available at: http://{}", config.bind_addr);

    let orchestrator = web::Data::from(orchestrator);
    let result = HttpServer::new(move || {
        App::new()
            .app_data(orchestrator.clone())
            .wrap(Logger::default())
            .service(
                web::scope("/api/trips")
                    .route("", web::post().to(create_trip))
                    .route("/{trip_id}", web::get().to(get_trip)),
            )
            .route("/health", web::get().to(health))
    })
    .bind(&config.bind_addr)?
    .run()
    .await;

    scan_manager.stop().await;
    result
}
