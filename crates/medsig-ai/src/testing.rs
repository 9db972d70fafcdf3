//! In-process fixtures: a scripted chat backend and a small built store.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use medsig_store::{Collection, HashingEmbedder, IndexBackend, KnowledgeStore};

use crate::client::{BackendError, ChatBackend, Message};

/// Replays queued responses in order and records every request.
pub struct ScriptedChat {
    replies: Mutex<VecDeque<Result<String, BackendError>>>,
    pub requests: Mutex<Vec<Vec<Message>>>,
    stall: bool,
}

impl ScriptedChat {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
            stall: false,
        }
    }

    /// Once the queue runs dry, never answer.
    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn push_error(&self, err: BackendError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, messages: &[Message]) -> Result<String, BackendError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(reply) => reply,
            None if self.stall => std::future::pending().await,
            None => Ok("I have nothing more to say.".into()),
        }
    }
}

pub const SIG_CORPUS: &str = r#"{"sig_text":"1 tab po qd x5d","english_instructions":"Take one tablet by mouth once a day for 5 days.","structured_instructions":{"sigs":[{"intakes":1,"intake_period":"P1D","intake_type":"tablet","duration":"P5D"}]}}
{"sig_text":"2 caps po bid x10d","english_instructions":"Take two capsules by mouth twice a day for 10 days.","structured_instructions":{"sigs":[{"intakes":4,"intake_period":"P1D","intake_type":"capsule","duration":"P10D"}]}}
{"sig_text":"2x tabs/3d then 1x/2d","english_instructions":"Take two tablets a day for 3 days, then one tablet a day for 2 days.","structured_instructions":{"sigs":[{"intakes":2,"intake_period":"P1D","intake_type":"tablet","duration":"P3D"},{"intakes":1,"intake_period":"P1D","intake_type":"tablet","duration":"P2D"}]}}
{"sig_text":"1 tab po q4h prn pain","english_instructions":"Take one tablet by mouth every 4 hours as needed for pain.","structured_instructions":{"sigs":[{"intakes":6,"intake_period":"P1D","intake_type":"tablet","duration":"P1D"}]}}
"#;

pub const MED_CORPUS: &str = "drug_name,form,max_daily_intakes,min_interval_hours,notes\n\
Paracetamol 500mg,tablet,4,4,Minimum interval 4 hours. Do not exceed 4 doses per day.\n\
Amoxicillin 500mg,capsule,3,8,Complete the full course.\n\
Ibuprofen 200mg,tablet,6,4,Take with food.\n";

/// A flat store over both collections, built with the hashing embedder.
pub async fn built_store(dir: &Path) -> Arc<KnowledgeStore> {
    let sig = dir.join("sig_examples.jsonl");
    let med = dir.join("medical_knowledge.csv");
    std::fs::write(&sig, SIG_CORPUS).unwrap();
    std::fs::write(&med, MED_CORPUS).unwrap();

    let store = KnowledgeStore::new(
        dir.join("vectorstores"),
        IndexBackend::Flat,
        Arc::new(HashingEmbedder::default()),
    );
    store.build(Collection::SigExamples, &sig, true).await.unwrap();
    store.build(Collection::MedicalKnowledge, &med, true).await.unwrap();
    Arc::new(store)
}
