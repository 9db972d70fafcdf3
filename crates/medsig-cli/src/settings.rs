//! Process-wide settings, resolved once from flags and environment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, ValueEnum};
use medsig_ai::{ChatBackend, OllamaClient, OllamaConfig, RetryPolicy, Translator, Validator};
use medsig_store::{Embedder, HashingEmbedder, IndexBackend, KnowledgeStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// Ollama `/api/embed` with `--embed-model`.
    Ollama,
    /// Offline feature hashing; no model server needed.
    Hashing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IndexKind {
    Flat,
    /// Requires a build with the `lancedb` feature.
    Lance,
}

impl From<IndexKind> for IndexBackend {
    fn from(kind: IndexKind) -> Self {
        match kind {
            IndexKind::Flat => IndexBackend::Flat,
            IndexKind::Lance => IndexBackend::Lance,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Directory holding the corpora and the pipeline input/output CSVs.
    #[arg(long, global = true, env = "MEDSIG_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory holding the persisted vector indexes.
    #[arg(long, global = true, env = "MEDSIG_VECTOR_DIR", default_value = "vectorstores")]
    pub vector_dir: PathBuf,

    #[arg(long, global = true, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
    pub ollama_url: String,

    #[arg(long, global = true, env = "MEDSIG_CHAT_MODEL", default_value = "llama3.2")]
    pub chat_model: String,

    #[arg(long, global = true, env = "MEDSIG_EMBED_MODEL", default_value = "llama3.2")]
    pub embed_model: String,

    #[arg(long, global = true, default_value_t = 0.1)]
    pub temperature: f32,

    /// Per-request HTTP timeout.
    #[arg(long, global = true, default_value_t = 300)]
    pub request_timeout_secs: u64,

    #[arg(long, global = true, value_enum, default_value_t = EmbedderKind::Ollama)]
    pub embedder: EmbedderKind,

    #[arg(long, global = true, value_enum, default_value_t = IndexKind::Flat)]
    pub index: IndexKind,

    /// Sig examples retrieved per translation.
    #[arg(long, global = true, default_value_t = medsig_ai::DEFAULT_SIG_K)]
    pub sig_k: usize,

    /// Drug references retrieved per validation.
    #[arg(long, global = true, default_value_t = medsig_ai::DEFAULT_MED_K)]
    pub med_k: usize,

    /// Model calls per translation before giving up.
    #[arg(long, global = true, default_value_t = medsig_ai::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Retry translations until they parse, ignoring --max-attempts.
    #[arg(long, global = true)]
    pub unbounded_retries: bool,

    /// Overall limit for one translation, retries included.
    #[arg(long, global = true)]
    pub translate_timeout_secs: Option<u64>,
}

/// Shared handles built once per process.
pub struct Backends {
    pub chat: Arc<dyn ChatBackend>,
    pub store: Arc<KnowledgeStore>,
}

impl Settings {
    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            base_url: self.ollama_url.clone(),
            chat_model: self.chat_model.clone(),
            embed_model: self.embed_model.clone(),
            temperature: self.temperature,
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = if self.unbounded_retries {
            RetryPolicy::unbounded()
        } else {
            RetryPolicy::bounded(self.max_attempts)
        };
        match self.translate_timeout_secs {
            Some(secs) => policy.with_timeout(Duration::from_secs(secs)),
            None => policy,
        }
    }

    pub fn backends(&self) -> anyhow::Result<Backends> {
        let ollama = Arc::new(
            OllamaClient::new(self.ollama_config()).context("creating Ollama HTTP client")?,
        );
        let embedder: Arc<dyn Embedder> = match self.embedder {
            EmbedderKind::Ollama => ollama.clone() as Arc<dyn Embedder>,
            EmbedderKind::Hashing => Arc::new(HashingEmbedder::default()),
        };
        let store = KnowledgeStore::new(&self.vector_dir, self.index.into(), embedder);
        Ok(Backends {
            chat: ollama,
            store: Arc::new(store),
        })
    }

    pub fn translator(&self, backends: &Backends) -> Translator {
        Translator::new(backends.chat.clone(), backends.store.clone())
            .with_k(self.sig_k)
            .with_policy(self.retry_policy())
    }

    pub fn validator(&self, backends: &Backends) -> Validator {
        Validator::new(backends.chat.clone(), backends.store.clone()).with_k(self.med_k)
    }

    pub fn input_path(&self) -> PathBuf {
        self.data_dir.join("input_sigs.csv")
    }

    pub fn output_path(&self) -> PathBuf {
        self.data_dir.join("output_sigs.csv")
    }
}
