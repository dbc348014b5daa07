//! Binary entry point for the relay.

use std::net::{Ipv4Addr, SocketAddr};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    mailgate::telemetry::init();

    let state = mailgate::initialize_state().await?;

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "1111".to_string())
        .parse::<u16>()?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server started");
    axum::serve(listener, mailgate::app(state)).await?;

    Ok(())
}
