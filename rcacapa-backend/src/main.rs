use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

mod agents;
mod ai;
mod config;
mod context;
mod controllers;
mod host;
mod http;
mod sessions;

use config::Config;
use context::AppContext;
use host::HostRouter;
use sessions::SessionStore;

pub struct AppState {
    pub router: Arc<HostRouter>,
    pub sessions: Arc<SessionStore>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env().map_err(|e| {
        log::error!("[LIFECYCLE] Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    let port = config.port;

    let context = AppContext::init(&config).await.map_err(|e| {
        log::error!("[LIFECYCLE] Startup failed: {}", e);
        std::io::Error::other(e.to_string())
    })?;

    log::info!("Starting RCA/CAPA query service on port {}", port);

    let router = Arc::clone(&context.router);
    let sessions = Arc::clone(&context.sessions);

    let result = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                router: Arc::clone(&router),
                sessions: Arc::clone(&sessions),
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::query::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await;

    context.shutdown().await;
    result
}
