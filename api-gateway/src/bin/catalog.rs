//! Catalog Lambda - Handles GET /api/catalog.

use lambda_http::{run, service_fn, Error};
use shared::proxy::catalog::CatalogService;
use shared::Config;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env()?;
    let catalog = Arc::new(CatalogService::load(&config.catalog_path, config.catalog_top_n).await);

    run(service_fn(move |event| {
        let catalog = catalog.clone();
        async move { catalog.handle(event).await }
    }))
    .await
}
