//! Statistics data proxy Lambda - Handles GET /api/abs-data.

use lambda_http::{run, service_fn, Error};
use shared::proxy::data::{DataProxy, HttpUpstream};
use shared::Config;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env()?;
    info!(base_url = %config.abs_base_url, "Starting statistics data proxy");

    let proxy = Arc::new(DataProxy::new(HttpUpstream::new()?, config.abs_base_url));

    run(service_fn(move |event| {
        let proxy = proxy.clone();
        async move { proxy.handle(event).await }
    }))
    .await
}
