use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum::http::{HeaderValue, Method, header};
use clap::Parser;
use course_tracker::{
    api::{self, ApiDoc},
    config::Config,
    server::Server,
    store,
    utils::init_log,
};
use time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{Expiry, SessionManagerLayer};
use tower_sessions_sqlx_store::SqliteStore;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "course_tracker.toml")]
    config: PathBuf,
    /// Database url, overrides the config file
    #[arg(short, long)]
    database: Option<String>,
    #[arg(short = 'H', long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Directory for log files, stdout when unset
    #[arg(short, long)]
    log_dir: Option<PathBuf>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.database {
            config.database.url = url;
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = self.log_dir {
            config.log.dir = Some(dir);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    args.apply(&mut config);
    let _guard = init_log(config.log.dir.clone())?;

    let database = store::connect(&config.database).await?;
    let session_store = SqliteStore::new(database.clone());
    session_store.migrate().await?;
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_expiry(Expiry::OnInactivity(Duration::days(5)));

    let origins = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let server = Arc::new(Server::new(database, &config));
    let app = api::router(server.clone())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(session_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");
    info!("swagger ui available at http://{addr}/swagger-ui/");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    server.shutdown().await;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
