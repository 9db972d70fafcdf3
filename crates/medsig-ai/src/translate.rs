//! Sig translation: retrieve examples, prompt, recover, retry, repair English.

use std::sync::Arc;
use std::time::Duration;

use medsig_core::{RecoveryError, StructuredSig, TranslationResult, recover_english, recover_translation};
use medsig_store::{Collection, Document, KnowledgeStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{BackendError, ChatBackend, Message};
use crate::prompt;
use crate::retry::RetryPolicy;

/// Examples retrieved per translation.
pub const DEFAULT_SIG_K: usize = 3;

#[derive(Error, Debug)]
pub enum TranslateError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("no usable translation after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: RecoveryError },
    #[error("translation timed out after {0:?}")]
    TimedOut(Duration),
}

pub struct Translator {
    chat: Arc<dyn ChatBackend>,
    store: Arc<KnowledgeStore>,
    k: usize,
    policy: RetryPolicy,
}

impl Translator {
    pub fn new(chat: Arc<dyn ChatBackend>, store: Arc<KnowledgeStore>) -> Self {
        Self {
            chat,
            store,
            k: DEFAULT_SIG_K,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Translate one raw sig. Returns the result and the examples it was
    /// grounded on, closest first.
    pub async fn translate(
        &self,
        sig_text: &str,
    ) -> Result<(TranslationResult, Vec<Document>), TranslateError> {
        let examples = self
            .store
            .retrieve(Collection::SigExamples, sig_text, self.k)
            .await?;
        info!(sig = sig_text, examples = examples.len(), "translating sig");

        let result = match self.policy.timeout {
            Some(limit) => tokio::time::timeout(limit, self.complete(&examples, sig_text))
                .await
                .map_err(|_| TranslateError::TimedOut(limit))??,
            None => self.complete(&examples, sig_text).await?,
        };
        Ok((result, examples))
    }

    /// Retry until parsed, then fill in missing English.
    async fn complete(
        &self,
        examples: &[Document],
        sig_text: &str,
    ) -> Result<TranslationResult, TranslateError> {
        let messages = prompt::translation(examples, sig_text);
        let mut result = self.until_parsed(&messages).await?;
        if result.needs_english() {
            result.english_instructions = self
                .repair_english(examples, sig_text, &result.structured)
                .await?;
        }
        Ok(result)
    }

    async fn until_parsed(&self, messages: &[Message]) -> Result<TranslationResult, TranslateError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let raw = self.chat.chat(messages).await?;
            debug!(attempt = attempts, raw = %raw, "translation response");

            match recover_translation(&raw) {
                Ok(result) => {
                    info!(
                        attempt = attempts,
                        instructions = result.structured.len(),
                        "translation parsed"
                    );
                    return Ok(result);
                }
                Err(err) if self.policy.allows_retry(attempts) => {
                    warn!(attempt = attempts, error = %err, "unusable translation, retrying");
                }
                Err(err) => {
                    warn!(attempt = attempts, error = %err, "giving up on translation");
                    return Err(TranslateError::Exhausted {
                        attempts,
                        last: err,
                    });
                }
            }
        }
    }

    /// Best effort: the model's paraphrase, else its raw reply, else the sig.
    async fn repair_english(
        &self,
        examples: &[Document],
        sig_text: &str,
        structured: &StructuredSig,
    ) -> Result<String, TranslateError> {
        info!(sig = sig_text, "translation lacked English, requesting paraphrase");
        let messages = prompt::english_repair(examples, sig_text, structured);
        let raw = self.chat.chat(&messages).await?;
        debug!(raw = %raw, "english repair response");
        Ok(recover_english(&raw).unwrap_or_else(|| {
            warn!(sig = sig_text, "empty paraphrase, using the raw sig");
            sig_text.to_string()
        }))
    }
}
