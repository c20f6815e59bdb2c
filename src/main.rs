use anyhow::Context;
use axum::http::Method;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exo_classifier::{api, ServiceConfig, ServiceContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exo_classifier=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    let addr = config.socket_addr()?;

    let ctx = ServiceContext::load(&config).with_context(|| {
        format!(
            "failed to load model {} with card {}",
            config.model_path.display(),
            config.card_path.display()
        )
    })?;
    tracing::info!(
        "loaded {:?} model; features[{}]: {:?}; classes: {:?}",
        ctx.model.kind(),
        ctx.card.n_features(),
        &ctx.card.features,
        &ctx.card.classes
    );

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);

    let app = api::router(Arc::new(ctx))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
