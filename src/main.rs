use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use athena_console::aggregator::Aggregator;
use athena_console::api::{AppState, router};
use athena_console::config::AppConfig;
use athena_console::geo::GeoResolver;
use athena_console::health::HealthGate;
use athena_console::layout_store::{KratosLayoutBackend, LayoutService};
use athena_console::upstream::{HydraClient, KratosClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("athena_console=info".parse()?))
        .init();

    let config = AppConfig::from_env();
    info!(
        port = config.port,
        kratos = %config.kratos_admin_url,
        hydra_enabled = config.hydra_enabled,
        ory_network = config.ory_network,
        "Starting Athena console"
    );

    let kratos = KratosClient::new(&config.kratos_admin_url);
    let hydra = config
        .hydra_enabled
        .then(|| HydraClient::new(&config.hydra_admin_url));

    let health = Arc::new(HealthGate::new(
        kratos.clone(),
        hydra.clone(),
        config.ory_network,
    ));
    let aggregator = Arc::new(Aggregator::new(
        kratos.clone(),
        hydra,
        GeoResolver::new(&config.geo_api_url),
        Arc::clone(&health),
    ));
    let layouts = Arc::new(LayoutService::new(Arc::new(KratosLayoutBackend::new(
        kratos,
    ))));

    Arc::clone(&aggregator).spawn_background_refresh();

    let app = router(AppState {
        aggregator,
        layouts,
        health,
    })
    .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Athena console is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
