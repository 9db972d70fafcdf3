//! Dose validation against retrieved drug references.

use std::sync::Arc;

use medsig_core::{ValidationResult, VerdictSource, recover_verdict};
use medsig_store::{Collection, Document, KnowledgeStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{BackendError, ChatBackend};
use crate::prompt;

/// References retrieved per validation.
pub const DEFAULT_MED_K: usize = 3;

/// Unparseable model output never lands here: it degrades to a keyword
/// verdict instead.
#[derive(Error, Debug)]
pub enum ValidateError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub struct Validator {
    chat: Arc<dyn ChatBackend>,
    store: Arc<KnowledgeStore>,
    k: usize,
}

impl Validator {
    pub fn new(chat: Arc<dyn ChatBackend>, store: Arc<KnowledgeStore>) -> Self {
        Self {
            chat,
            store,
            k: DEFAULT_MED_K,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Judge `english_instructions` for `drug_name`. One model call.
    pub async fn validate(
        &self,
        drug_name: &str,
        english_instructions: &str,
    ) -> Result<(ValidationResult, Vec<Document>), ValidateError> {
        let query = prompt::validation_query(drug_name, english_instructions);
        let references = self
            .store
            .retrieve(Collection::MedicalKnowledge, &query, self.k)
            .await?;

        let messages = prompt::validation(&references, drug_name, english_instructions);
        let raw = self.chat.chat(&messages).await?;
        debug!(raw = %raw, "validation response");

        let verdict = recover_verdict(&raw);
        if verdict.source == VerdictSource::Keywords {
            warn!(
                drug = drug_name,
                decision = %verdict.decision,
                "validation output had no decision field, used keyword scan"
            );
        }
        let result = ValidationResult::new(verdict.decision, verdict.reason);
        info!(
            drug = drug_name,
            decision = %result.decision,
            references = references.len(),
            "validated"
        );
        Ok((result, references))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedChat, built_store};
    use medsig_core::Decision;
    use tempfile::TempDir;

    #[tokio::test]
    async fn json_verdict_is_normalised() {
        let tmp = TempDir::new().unwrap();
        let store = built_store(tmp.path()).await;
        let chat = Arc::new(ScriptedChat::new([
            r#"```json
{"decision": " ok ", "reason": "Within the 4 doses per day limit."}
```"#,
        ]));

        let (result, refs) = Validator::new(chat.clone(), store)
            .validate("Paracetamol 500mg", "Take one tablet by mouth once a day for 5 days.")
            .await
            .unwrap();
        assert_eq!(result.decision, Decision::Ok);
        assert_eq!(result.emoji, "✅");
        assert_eq!(result.reason, "Within the 4 doses per day limit.");
        assert_eq!(refs.len(), 3);
        assert_eq!(chat.calls(), 1);

        let prompt = &chat.requests.lock().unwrap()[0][1].content;
        assert!(prompt.contains("Drug name: Paracetamol 500mg"));
    }

    #[tokio::test]
    async fn keyword_fallback_rejects_too_frequent_dosing() {
        let tmp = TempDir::new().unwrap();
        let store = built_store(tmp.path()).await;
        let chat = Arc::new(ScriptedChat::new([
            "Taking paracetamol every 2 hours is too much and unsafe; the minimum interval is 4 hours.",
        ]));

        let (result, refs) = Validator::new(chat, store)
            .validate("Paracetamol 500mg", "Take one tablet every 2 hours.")
            .await
            .unwrap();
        assert_eq!(result.decision, Decision::NotOk);
        assert_eq!(result.emoji, "❌");
        assert!(result.reason.contains("too much"));
        assert!(refs.iter().any(|r| r.content.contains("Minimum interval: 4 hours")));
    }

    #[tokio::test]
    async fn unexpected_decision_string_is_not_ok() {
        let tmp = TempDir::new().unwrap();
        let store = built_store(tmp.path()).await;
        let chat = Arc::new(ScriptedChat::new([r#"{"decision":"MAYBE","reason":"unclear"}"#]));

        let (result, _) = Validator::new(chat, store)
            .with_k(1)
            .validate("Amoxicillin 500mg", "Take one capsule three times a day.")
            .await
            .unwrap();
        assert_eq!(result.decision, Decision::NotOk);
        assert_eq!(result.reason, "unclear");
    }
}
