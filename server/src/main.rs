use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use anyhow::Context;
use mongodb::Client;
use tokio::time;

use launchpad::config::AppConfig;
use launchpad::db::{Database, MongoDbContext};
use launchpad::mailer::LogMailer;
use launchpad::oauth::OAuthProviders;
use launchpad::routes;
use launchpad::state::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (for development)
    // Try loading from current directory first, then from server/ directory
    if dotenvy::dotenv().is_err() {
        dotenvy::from_filename("server/.env").ok();
    }

    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    log::info!("Starting Launchpad server...");
    log::info!("Protocol version: {}", protocol::protocol_version());

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "server/config/app.toml".to_string());
    let config = AppConfig::load_from_file(&config_path)
        .with_context(|| format!("failed to load configuration from '{config_path}'"))?;

    let db = if config.database.is_in_memory() {
        log::warn!("Using the in-memory store; data is lost on restart");
        Database::in_memory()
    } else {
        log::info!("Connecting to MongoDB...");
        let client = Client::with_uri_str(&config.database.uri)
            .await
            .context("failed to connect to MongoDB")?;
        let context = MongoDbContext::new(client, &config.database.name);
        context.ping().await.context("MongoDB did not answer ping")?;

        log::info!("Initializing database indexes...");
        context
            .init_indexes()
            .await
            .context("failed to initialize database indexes")?;
        Database::mongo(&context)
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;
    let oauth = OAuthProviders::from_config(&config, http);

    let state = AppState::new(config, db, Arc::new(LogMailer), oauth)
        .context("failed to build application state")?;

    log::info!(
        "Session expiry set to {} hours",
        state.config.session.expiry_hours
    );

    // Background cleanup. Mongo TTL indexes do the same work eventually;
    // these keep counts exact and cover the in-memory store.
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Err(err) = cleanup_state.sessions.cleanup_expired().await {
                log::error!("Session cleanup failed: {}", err);
            }
            if let Err(err) = cleanup_state.tokens.cleanup_expired().await {
                log::error!("Token cleanup failed: {}", err);
            }
        }
    });

    let rate_limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(300)); // Every 5 minutes
        loop {
            interval.tick().await;
            rate_limiter.cleanup_old_entries();
            log::debug!("Background cleanup: cleaned rate limiter entries");
        }
    });

    let host = state.config.server.host.clone();
    let port = state.config.server.port;
    log::info!("Starting HTTP server at {}:{}...", host, port);

    let data = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(actix_middleware::Logger::default())
            .wrap(actix_middleware::Compress::default())
            .configure(routes::configure)
    })
    .bind((host, port))?
    .run()
    .await?;

    Ok(())
}
