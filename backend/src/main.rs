use actix_web::{web, HttpServer};
use log::info;
use studenthub_backend::config::{load_dotenv, AppConfig};
use studenthub_backend::{create_app, init_db, AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    load_dotenv();

    let config = AppConfig::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    let db_pool = init_db(&config.database_url)
        .await
        .map_err(|e| std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to initialize database: {}", e)
        ))?;

    info!("Database initialized successfully");

    let app_state = web::Data::new(AppState::new(db_pool, &config));

    info!("Starting server at http://{}:{}", config.bind_address, config.port);

    HttpServer::new(move || create_app(app_state.clone()))
        .bind((config.bind_address.as_str(), config.port))?
        .run()
        .await
}
