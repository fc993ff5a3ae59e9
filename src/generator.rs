use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Collaborator contract for the text generator. Failures stay typed so the
/// orchestrator can fold them into a `generation_error` result instead of
/// letting them escape as exceptions.
pub trait Generator {
    fn generate(&self, prompt: &str) -> Result<String, GeneratorError>;
}

#[derive(Debug)]
pub enum GeneratorError {
    Timeout { budget_ms: u64 },
    Unavailable(String),
    BadResponse(String),
}

impl fmt::Display for GeneratorError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { budget_ms } => {
                write!(formatter, "generator timed out after {budget_ms} ms")
            }
            Self::Unavailable(reason) => write!(formatter, "generator unavailable: {reason}"),
            Self::BadResponse(reason) => {
                write!(formatter, "generator returned malformed response: {reason}")
            }
        }
    }
}

impl std::error::Error for GeneratorError {}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

pub struct OllamaGenerator {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    timeout_ms: u64,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: &str, timeout_ms: u64) -> Result<Self, GeneratorError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()
            .map_err(|err| GeneratorError::Unavailable(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout_ms,
        })
    }
}

impl Generator for OllamaGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions { temperature: 0.0 },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    GeneratorError::Timeout {
                        budget_ms: self.timeout_ms,
                    }
                } else {
                    GeneratorError::Unavailable(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, model = %self.model, "generator returned non-success status");
            return Err(GeneratorError::Unavailable(format!(
                "http status {status} from {}",
                self.base_url
            )));
        }

        let body: OllamaGenerateResponse = response
            .json()
            .map_err(|err| GeneratorError::BadResponse(err.to_string()))?;

        Ok(body.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_the_failure() {
        let timeout = GeneratorError::Timeout { budget_ms: 250 };
        assert!(timeout.to_string().contains("250 ms"));

        let unavailable = GeneratorError::Unavailable("connection refused".to_string());
        assert!(unavailable.to_string().contains("connection refused"));
    }
}
