use crate::error::{Result, ValidationError};
use crate::provider_registry::{ConnectionTestResult, ProviderRegistry};
use std::sync::Arc;
use tracing::{info, warn};

/// Checks that a key works by issuing one minimal request to its provider.
///
/// Keys tested here are never stored. The settings are left untouched whether
/// the test succeeds or fails.
pub struct ConnectionTester {
    registry: Arc<ProviderRegistry>,
}

impl ConnectionTester {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub async fn test(&self, provider: &str, api_key: &str) -> Result<ConnectionTestResult> {
        let client = self.registry.get_client_by_name(provider)?;
        if api_key.trim().is_empty() {
            return Err(ValidationError::EmptyApiKey.into());
        }

        if !client.is_valid_key_format(api_key) {
            // Advisory only.
            warn!(provider = %provider, "API key does not match the expected format");
        }

        info!(provider = %provider, "Testing connection");
        let result = client.test_connection(api_key).await?;
        Ok(result)
    }
}
