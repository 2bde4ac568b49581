//! Assistant chat Lambda - Handles POST /api/chat.

use lambda_http::{run, service_fn, Error};
use shared::proxy::{chat, AssistantGateway};
use shared::{secrets, Config};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = secrets::resolve_assistant_credentials(Config::from_env()?).await;
    let gateway = Arc::new(AssistantGateway::from_config(&config)?);
    gateway.log_configuration();

    run(service_fn(move |event| {
        let gateway = gateway.clone();
        async move { chat::handle(&gateway, event).await }
    }))
    .await
}
