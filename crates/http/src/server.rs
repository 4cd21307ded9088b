use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;

use crate::router::app_router;
use crate::state::GatewayState;

pub async fn serve_http(state: Arc<GatewayState>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("sw-gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = app_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
