use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use display_rig::{CommandProfile, HttpDisplayRig, HttpPresentationClient};
use playback::{CommandDispatcher, PlaybackController};
use server_api::{ApiContext, CartoWarehouse, FlagStore, StorageUsageReporter};
use storage::Storage;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

mod app_state;
mod config;
mod routes;

use app_state::AppState;
use config::{load_settings, prepare_database_url, Settings};

const WAREHOUSE_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let api = build_context(&settings, storage).await?;
    let app = routes::build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind_addr))?;
    info!(%addr, rig = %settings.display_rig_url, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_context(settings: &Settings, storage: Storage) -> anyhow::Result<ApiContext> {
    let flags = Arc::new(
        FlagStore::open(settings.flags.clone(), settings.flags_file.clone())
            .await
            .context("failed to load feature flags")?,
    );

    let rig = HttpDisplayRig::new(
        parse_url("DISPLAY_RIG_URL", &settings.display_rig_url)?,
        settings.dispatch_timeout,
    )?;
    let presenter = Arc::new(HttpPresentationClient::new(
        parse_url("MARKET_CANVAS_URL", &settings.market_canvas_url)?,
        settings.market_canvas_site.clone(),
        settings.market_canvas_cookie.clone(),
        settings.dispatch_timeout,
    )?);
    let warehouse = CartoWarehouse::new(
        parse_url("CARTO_QUERY_URL", &settings.carto_query_url)?,
        settings.carto_api_token.clone(),
        WAREHOUSE_TIMEOUT,
    )?;

    let profile = CommandProfile {
        object_path: settings.display_object_path.clone(),
        canvas_site: settings.market_canvas_site.clone(),
    };
    let dispatcher = CommandDispatcher::new(Arc::new(rig), presenter.clone(), profile)
        .with_timeout(settings.dispatch_timeout);
    let playback = PlaybackController::new(
        dispatcher,
        flags.clone(),
        Arc::new(StorageUsageReporter::new(storage.clone())),
    );

    Ok(ApiContext {
        storage,
        admin_code: settings.admin_code.clone(),
        flags,
        warehouse: Arc::new(warehouse),
        presenter,
        playback,
    })
}

fn parse_url(key: &str, raw: &str) -> anyhow::Result<Url> {
    Url::parse(raw).with_context(|| format!("{key} is not a valid url: '{raw}'"))
}
