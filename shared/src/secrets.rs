//! AWS Secrets Manager integration.

use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{Config, Error, Result};

/// Cached secrets with lazy initialization.
static SECRETS_CACHE: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn get_cache() -> &'static RwLock<HashMap<String, String>> {
    SECRETS_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Assistant credentials stored as a JSON secret.
#[derive(Debug, Deserialize)]
pub struct AssistantSecret {
    pub api_key: Option<String>,
    pub assistant_id: Option<String>,
}

/// Get a secret value from Secrets Manager with caching.
pub async fn get_secret(client: &SecretsClient, secret_arn: &str) -> Result<String> {
    {
        let cache = get_cache().read().await;
        if let Some(value) = cache.get(secret_arn) {
            return Ok(value.clone());
        }
    }

    let response = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| Error::Aws(format!("Failed to get secret: {}", e)))?;

    let secret_string = response
        .secret_string()
        .ok_or_else(|| Error::Aws("Secret has no string value".to_string()))?
        .to_string();

    {
        let mut cache = get_cache().write().await;
        cache.insert(secret_arn.to_string(), secret_string.clone());
    }

    Ok(secret_string)
}

/// Parse the assistant credentials secret.
pub fn parse_assistant_secret(secret_string: &str) -> Result<AssistantSecret> {
    serde_json::from_str(secret_string)
        .map_err(|e| Error::Aws(format!("Failed to parse assistant credentials: {}", e)))
}

/// Fill assistant credentials missing from the environment using the configured secret.
///
/// Values already present in the environment win. A failed lookup is logged and leaves
/// the configuration untouched, so requests later fail with a configuration error
/// instead of the cold start aborting.
pub async fn resolve_assistant_credentials(mut config: Config) -> Config {
    if config.has_assistant_credentials() {
        return config;
    }
    let Some(secret_arn) = config.openai_secret_arn.clone() else {
        return config;
    };

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let client = SecretsClient::new(&aws_config);

    match get_secret(&client, &secret_arn)
        .await
        .and_then(|s| parse_assistant_secret(&s))
    {
        Ok(secret) => {
            info!(
                has_api_key = secret.api_key.is_some(),
                has_assistant_id = secret.assistant_id.is_some(),
                "Loaded assistant credentials from Secrets Manager"
            );
            merge_secret(&mut config, secret);
        }
        Err(e) => warn!("Assistant credentials lookup failed: {}", e),
    }

    config
}

fn merge_secret(config: &mut Config, secret: AssistantSecret) {
    if config.openai_api_key.is_none() {
        config.openai_api_key = secret.api_key.filter(|v| !v.is_empty());
    }
    if config.assistant_id.is_none() {
        config.assistant_id = secret.assistant_id.filter(|v| !v.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assistant_secret() {
        let json = r#"{"api_key":"sk-live","assistant_id":"asst_abc"}"#;
        let secret = parse_assistant_secret(json).unwrap();
        assert_eq!(secret.api_key.as_deref(), Some("sk-live"));
        assert_eq!(secret.assistant_id.as_deref(), Some("asst_abc"));
    }

    #[test]
    fn test_environment_values_win_over_secret() {
        let mut config = Config {
            openai_api_key: Some("sk-env".into()),
            ..Config::default()
        };
        merge_secret(
            &mut config,
            AssistantSecret {
                api_key: Some("sk-secret".into()),
                assistant_id: Some("".into()),
            },
        );
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.assistant_id, None);
    }

    #[tokio::test]
    async fn test_without_secret_arn_config_is_unchanged() {
        let config = resolve_assistant_credentials(Config::default()).await;
        assert!(!config.has_assistant_credentials());
    }
}
