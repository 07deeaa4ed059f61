use axum::extract::DefaultBodyLimit;
use lead_relay::config::AppConfig;
use lead_relay::poller::Poller;
use lead_relay::{service, telemetry};
use relay_web_axum::AppState;
use relay_web_generic::LeadProcessor;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    telemetry::init(&config.logging)?;
    for warning in config.warnings() {
        warn!("{}", warning);
    }

    let handler = service::build_handler(&config)?;
    if config.poller.enabled {
        tokio::spawn(Poller::new(handler.clone(), &config.poller).run());
    }

    let app = relay_web_axum::router(AppState {
        processor: LeadProcessor::new(handler),
    })
    .layer(DefaultBodyLimit::max(config.server.max_body_size));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
