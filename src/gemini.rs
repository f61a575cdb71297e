use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

// Model constants
pub const GEMINI_FLASH: &str = "gemini-2.5-flash";

/// One text-generation call: system framing plus a single prompt turn.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// Ask the model for a JSON response body instead of prose.
    pub json_output: bool,
}

impl GenerateRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        GenerateRequest {
            system: None,
            prompt: prompt.into(),
            temperature: None,
            max_output_tokens: None,
            json_output: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// Seam between the prompt templates and the hosted model, so the
/// orchestrator and dashboard can run against a stub in tests.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ContentPart>,
    contents: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentPart {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ContentPart,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    message: String,
    status: String,
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_API_URL, self.model)
    }

    async fn generate_content(&self, request: GenerateContentRequest) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;

            // Try to parse structured error
            if let Ok(parsed) = serde_json::from_str::<GeminiError>(&error_text) {
                return Err(ChatError::Generation(format!(
                    "Gemini API error ({}): {} - {}",
                    status, parsed.error.status, parsed.error.message
                )));
            }

            return Err(ChatError::Generation(format!(
                "Gemini API error ({}): {}",
                status, error_text
            )));
        }

        let completion: GenerateContentResponse = response.json().await?;

        completion
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| ChatError::Generation("No text response from Gemini".to_string()))
    }

    /// Validate the Gemini API key with a minimal generation call.
    pub async fn validate_api_key(&self) -> Result<bool> {
        let request = GenerateContentRequest {
            system_instruction: None,
            contents: vec![ContentPart {
                parts: vec![TextPart {
                    text: "Say 'ok'".to_string(),
                }],
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.0),
                max_output_tokens: Some(10),
                response_mime_type: None,
            }),
        };

        match self.generate_content(request).await {
            Ok(_) => Ok(true),
            Err(ChatError::Generation(msg)) if msg.contains("401") || msg.contains("403") => {
                Err(ChatError::Generation("Invalid Gemini API key".to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let generation_config = GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_output_tokens,
            response_mime_type: if request.json_output {
                Some("application/json".to_string())
            } else {
                None
            },
        };

        let wire_request = GenerateContentRequest {
            system_instruction: request.system.map(|s| ContentPart {
                parts: vec![TextPart { text: s }],
            }),
            contents: vec![ContentPart {
                parts: vec![TextPart {
                    text: request.prompt,
                }],
            }],
            generation_config: Some(generation_config),
        };

        self.generate_content(wire_request).await
    }
}
