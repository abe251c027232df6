use actix_web::{web, App, HttpServer};
use freightlink::config::{init_pool, AppConfig, StoreBackend};
use freightlink::logger::setup_logger;
use freightlink::middleware::RequestLogger;
use freightlink::routes;
use freightlink::services::UserService;
use freightlink::store::{MemoryStore, PgStore, Store};
use log::{error, info, warn};
use std::io;
use std::sync::Arc;

fn startup_error(message: String) -> io::Error {
    error!("{}", message);
    io::Error::new(io::ErrorKind::Other, message)
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load environment variables and initialize logger
    dotenvy::dotenv().ok();
    setup_logger();

    let config = AppConfig::from_env();
    config
        .validate()
        .map_err(|e| startup_error(format!("Invalid configuration: {}", e)))?;

    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| startup_error("DATABASE_URL must be set".to_string()))?;
            info!("Connecting to database");
            let pool = init_pool(database_url).map_err(startup_error)?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };

    if let Some(admin) = &config.admin {
        let bootstrap_store = store.clone();
        let bootstrap_config = config.clone();
        let admin = admin.clone();
        web::block(move || UserService::ensure_admin(&admin, &bootstrap_config, &*bootstrap_store))
            .await
            .map_err(|e| startup_error(format!("Admin bootstrap failed: {}", e)))?
            .map_err(|e| startup_error(format!("Admin bootstrap failed: {}", e)))?;
    }

    let host = config.host.clone();
    let port = config.port;
    let workers = config.workers;
    let store_data = web::Data::from(store);
    let config_data = web::Data::new(config);

    info!("Starting HTTP server at http://{}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)
            .app_data(store_data.clone())
            .app_data(config_data.clone())
            .service(web::scope("/api").configure(routes::configure))
    })
    .workers(workers)
    .keep_alive(std::time::Duration::from_secs(75))
    .shutdown_timeout(30)
    .bind((host, port))?
    .run()
    .await
}
