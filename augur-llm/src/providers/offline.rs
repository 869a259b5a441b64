//! Deterministic offline backend
//!
//! Always available and never fails. The output is a pure function of the
//! normalized prompt and the call type, so identical prompts always produce
//! identical text across runs and processes.

use crate::GenerationProvider;
use async_trait::async_trait;
use augur_core::{normalize_prompt, CallType, GenerationRequest, GenerationResponse, LlmError, ProviderKind};
use sha2::{Digest, Sha256};

const PROVIDER_ID: &str = "offline";

const DECISION_TEMPLATES: &[&str] = &[
    "The council acknowledges the order and sets it in motion.",
    "Your instruction is understood; the villagers begin without delay.",
    "The steward records the decision and assigns hands to the task.",
    "Word of the decision spreads, and the work is taken up.",
];

const NARRATIVE_TEMPLATES: &[&str] = &[
    "The season turned quietly. Smoke rose from the hearths and the fields waited for hands.",
    "Clouds gathered over the ridge. In the square, people spoke in low voices of what was to come.",
    "The day passed as most days do, in small labours and shared bread, and the village endured.",
    "A cold wind came down from the hills. Doors were shut early, and the lamps burned late.",
    "Nothing remarkable happened, which in these times was its own small blessing.",
];

const CONVERSATION_TEMPLATES: &[&str] = &[
    "Fine weather for it, I suppose.",
    "Have you heard? The granary is fuller than last year.",
    "My back aches, but the work won't do itself.",
    "Keep your voice down, the elder is listening.",
    "We'll manage. We always do.",
];

/// Template backend used for circuit-open and retry-exhausted fallback.
#[derive(Debug, Clone, Default)]
pub struct OfflineProvider;

impl OfflineProvider {
    pub fn new() -> Self {
        Self
    }

    fn templates(call_type: CallType) -> &'static [&'static str] {
        match call_type {
            CallType::Decision => DECISION_TEMPLATES,
            CallType::Narrative => NARRATIVE_TEMPLATES,
            CallType::Conversation => CONVERSATION_TEMPLATES,
        }
    }

    /// Stable template index from a hash of the call type and prompt.
    fn template_index(call_type: CallType, prompt: &str) -> usize {
        let mut hasher = Sha256::new();
        hasher.update(call_type.as_db_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(normalize_prompt(prompt).as_bytes());
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let templates = Self::templates(call_type);
        (u64::from_be_bytes(prefix) % templates.len() as u64) as usize
    }

    /// Produce the offline response for a request. Zero tokens, zero cost.
    pub fn respond(&self, request: &GenerationRequest) -> GenerationResponse {
        let templates = Self::templates(request.call_type);
        let content = templates[Self::template_index(request.call_type, &request.prompt)];
        GenerationResponse::success(content, 0, 0, 0.0, 0)
    }
}

#[async_trait]
impl GenerationProvider for OfflineProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Offline
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        Ok(self.respond(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_prompts_identical_output() {
        let offline = OfflineProvider::new();
        let a = offline.respond(&GenerationRequest::new("allocate food to farmers", CallType::Decision));
        let b = offline.respond(&GenerationRequest::new("Allocate  food to FARMERS", CallType::Decision));
        assert_eq!(a.content, b.content);
        assert_eq!(a.total_tokens(), 0);
        assert_eq!(a.cost_usd, 0.0);
        assert!(a.success);
    }

    #[test]
    fn test_call_type_selects_template_set() {
        let offline = OfflineProvider::new();
        let response = offline.respond(&GenerationRequest::new("a quiet morning", CallType::Conversation));
        assert!(CONVERSATION_TEMPLATES.contains(&response.content.as_str()));
    }

    #[tokio::test]
    async fn test_always_available() {
        let offline = OfflineProvider::new();
        assert!(offline.is_available().await);
        let response = offline
            .generate(&GenerationRequest::new("", CallType::Narrative))
            .await
            .unwrap();
        assert!(!response.content.is_empty());
    }
}
