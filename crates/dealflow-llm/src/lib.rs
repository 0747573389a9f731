pub mod providers;
pub mod retry;
pub mod streaming;

use dealflow_core::config::{AppConfig, ModelConfig};
use dealflow_core::error::{DealflowError, Result};
use dealflow_core::traits::LlmClient;

pub use providers::gemini::GeminiClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "gemini" | "google" => Ok(Box::new(GeminiClient::new())),
        "openai" | "ollama" | "groq" | "openrouter" | "vllm" => Ok(Box::new(OpenAiClient::new())),
        other => Err(DealflowError::UnsupportedProvider(other.to_string())),
    }
}

/// Build the primary client wrapped with retries and the configured fallbacks.
pub fn client_from_config(config: &AppConfig) -> Result<Box<dyn LlmClient>> {
    let primary = create_client(&config.model)?;
    let fallbacks = config
        .fallback_models
        .iter()
        .map(|fb| create_client(fb).map(|client| (fb.clone(), client)))
        .collect::<Result<Vec<_>>>()?;
    let retry = config.model.retry.clone().unwrap_or_default();
    Ok(Box::new(RetryingClient::new(primary, fallbacks, retry)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(provider: &str) -> ModelConfig {
        ModelConfig {
            provider: provider.into(),
            model_id: "m".into(),
            api_key: None,
            base_url: None,
            max_tokens: 10,
            temperature: 0.0,
            retry: None,
        }
    }

    #[test]
    fn test_create_client_known_providers() {
        assert!(create_client(&model("gemini")).is_ok());
        assert!(create_client(&model("google")).is_ok());
        assert!(create_client(&model("ollama")).is_ok());
    }

    #[test]
    fn test_create_client_unknown_provider() {
        match create_client(&model("carrier-pigeon")) {
            Err(DealflowError::UnsupportedProvider(p)) => assert_eq!(p, "carrier-pigeon"),
            _ => panic!("expected UnsupportedProvider"),
        }
    }
}
