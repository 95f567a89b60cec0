//! Environment-driven configuration.
//!
//! Everything the process needs from its environment in one struct:
//!
//! | Variable | Meaning |
//! |---|---|
//! | `ACCORD_API_KEY` | reasoning API credential (required for a live client) |
//! | `ACCORD_API_BASE` | OpenAI-compatible base URL |
//! | `ACCORD_MODEL` | model name |
//! | `ACCORD_SCOPE_DEFAULT` | default scope selector |
//! | `ACCORD_COOKIE_DOMAIN` | cookie domain for session propagation |
//! | `ACCORD_VECTORS_PATH` | precomputed vectors archive path |
//! | `ACCORD_BEARER_TOKEN` | optional bearer token for the HTTP facade |

use std::path::PathBuf;

use crate::accord::errors::AccordError;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_SCOPE: &str = "all";

/// Process configuration assembled from environment variables.
#[derive(Debug, Clone)]
pub struct AccordConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub scope_default: String,
    pub cookie_domain: Option<String>,
    pub vectors_path: Option<PathBuf>,
    pub bearer_token: Option<String>,
}

impl Default for AccordConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            scope_default: DEFAULT_SCOPE.to_string(),
            cookie_domain: None,
            vectors_path: None,
            bearer_token: None,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl AccordConfig {
    /// Read the configuration from the environment. Never fails: a missing
    /// credential is only an error once a live client is requested.
    pub fn from_env() -> Self {
        Self {
            api_key: env_var("ACCORD_API_KEY"),
            api_base: env_var("ACCORD_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: env_var("ACCORD_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            scope_default: env_var("ACCORD_SCOPE_DEFAULT")
                .unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
            cookie_domain: env_var("ACCORD_COOKIE_DOMAIN"),
            vectors_path: env_var("ACCORD_VECTORS_PATH").map(PathBuf::from),
            bearer_token: env_var("ACCORD_BEARER_TOKEN"),
        }
    }

    /// The reasoning credential, required for live deployments.
    pub fn require_api_key(&self) -> Result<&str, AccordError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AccordError::config("ACCORD_API_KEY is not set"))
    }

    /// Build the live reasoning client this configuration describes.
    pub fn reasoning_client(
        &self,
    ) -> Result<crate::accord::clients::openai::OpenAIReasoningClient, AccordError> {
        let api_key = self.require_api_key()?;
        Ok(
            crate::accord::clients::openai::OpenAIReasoningClient::new_with_base_url(
                api_key,
                &self.model,
                &self.api_base,
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AccordConfig::default();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.scope_default, "all");
        assert!(config.vectors_path.is_none());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let config = AccordConfig::default();
        let err = config.require_api_key().unwrap_err();
        assert!(err.to_string().contains("ACCORD_API_KEY"));
    }

    #[test]
    fn test_require_api_key_present() {
        let config = AccordConfig {
            api_key: Some("sk-test".to_string()),
            ..AccordConfig::default()
        };
        assert_eq!(config.require_api_key().unwrap(), "sk-test");
    }

    #[test]
    fn test_reasoning_client_needs_credential() {
        assert!(AccordConfig::default().reasoning_client().is_err());

        let config = AccordConfig {
            api_key: Some("sk-test".to_string()),
            model: "my-model".to_string(),
            ..AccordConfig::default()
        };
        let client = config.reasoning_client().unwrap();
        use crate::accord::reasoning::ReasoningClient;
        assert_eq!(client.model_name(), "my-model");
    }
}
