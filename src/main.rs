//! Entry point: load config, wire dependencies, and run the relay.

use std::sync::Arc;

use dashfeed::auth::JwtSecret;
use dashfeed::config::Config;
use dashfeed::services::{ClassifierPipeline, EventHub, HttpCategorizer, TriggerAuth};
use dashfeed::{create_app, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let hub = EventHub::new();
    let categorizer = HttpCategorizer::new(
        config.classifier_url.clone(),
        config.classifier_api_key.clone(),
        config.classifier_model.clone(),
    )?;
    let classifier = Arc::new(ClassifierPipeline::new(
        Arc::new(categorizer),
        Arc::new(hub.clone()),
        config.classifier_settings(),
    ));

    let state = AppState {
        hub,
        classifier: classifier.clone(),
        trigger_auth: TriggerAuth::new(config.app_key.clone(), config.app_secret.clone()),
        jwt_secret: JwtSecret::new(config.jwt_secret.clone()),
    };
    let app = create_app(state);

    tracing::info!(addr = %config.server_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    classifier.shutdown();
    Ok(())
}
