/// HTTP front for a scene store: tile uploads, version listings and merges.
mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use clap::Parser;
use constants::server::{
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_STORE_DIR, MAX_BODY_BYTES, STATIC_SCENE_PREFIX,
};
use eyre::{Result, WrapErr};
use parking_lot::Mutex;
use scene_tiling::{FsVersionStore, SceneRegistry};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;
use tracing_subscriber::EnvFilter;

use routes::AppState;

#[derive(Parser, Debug)]
#[command(name = "tile-server", about = "Serve and version tiled scenes over HTTP")]
struct Args {
    /// Directory holding one sub-directory per scene
    #[arg(long, env = "TILE_STORE_DIR", default_value = DEFAULT_STORE_DIR)]
    store: PathBuf,
    #[arg(long, env = "TILE_SERVER_HOST", default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, env = "TILE_SERVER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn router(state: AppState, store_dir: PathBuf) -> Router {
    Router::new()
        .route("/update_tiles_version", post(routes::update_tiles_version))
        .route("/get_all_version", post(routes::get_all_version))
        .route("/merge_versions", post(routes::merge_versions))
        .route("/get_all_scene", post(routes::get_all_scene))
        .nest_service(STATIC_SCENE_PREFIX, ServeDir::new(store_dir))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    std::fs::create_dir_all(&args.store)
        .wrap_err_with(|| format!("creating store {}", args.store.display()))?;

    let registry = SceneRegistry::new(FsVersionStore::new(&args.store));
    let state: AppState = Arc::new(Mutex::new(registry));
    let app = router(state, args.store.clone());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .wrap_err("parsing listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;

    info!(%addr, store = %args.store.display(), "tile server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
