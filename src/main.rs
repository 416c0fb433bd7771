#![forbid(unsafe_code)]
use anyhow::Result;
use roombook::{api, authenticate::AuthApp, booker::BookingApp};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::services::ServeDir;
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, cors::CorsLayer,
    timeout::TimeoutLayer,
};
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    dotenvy::dotenv().ok();

    let frontend = ServeDir::new(env::var("FRONTEND_DIR")?);

    info!("Starting server");

    let rooms_file = format!("{}/rooms.json", env::var("CONFIG_DIR")?);
    let booker = Arc::new(BookingApp::open(rooms_file, env::var("DATA_DIR")?)?);
    let auth = Arc::new(RwLock::new(AuthApp::new(env::var("IDP_URL")?)));

    let middleware = tower::ServiceBuilder::new()
        .layer(CompressionLayer::new().quality(tower_http::CompressionLevel::Fastest))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive());

    let app = api::router(booker, auth)
        .fallback_service(frontend)
        .layer(middleware);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", env::var("PORT")?)).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
