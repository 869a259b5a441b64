//! Ollama API request and response types

use serde::{Deserialize, Serialize};

// ============================================================================
// GENERATION TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    pub options: GenerateOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
    #[serde(default)]
    pub eval_count: Option<u32>,
    #[serde(default)]
    pub done: bool,
}

// ============================================================================
// MODEL TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListModelsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_is_non_streaming() {
        let request = GenerateRequest {
            model: "llama3.2".to_string(),
            prompt: "hello".to_string(),
            system: None,
            stream: false,
            options: GenerateOptions {
                temperature: 0.2,
                num_predict: 64,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 64);
        assert!(json.get("system").is_none());
    }

    #[test]
    fn test_generate_response_missing_counts() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"response":"Aye.","done":true}"#).unwrap();
        assert_eq!(response.response, "Aye.");
        assert!(response.prompt_eval_count.is_none());
        assert!(response.done);
    }
}
