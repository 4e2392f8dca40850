//! Shared test scaffolding: a counting mock LLM and store helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use wg_radar::llm::{CompletionRequest, CompletionResponse, LlmClient};
use wg_radar::store::{Group, Store};

/// Deterministic LLM stand-in that counts its calls.
pub struct MockLlm {
    calls: AtomicUsize,
    response: String,
}

impl MockLlm {
    pub fn new(response: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            response: response.to_string(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, _req: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CompletionResponse {
            content: self.response.clone(),
            model: "mock-model".to_string(),
            tokens_used: 100,
        })
    }
}

/// Open an in-memory store and register one group in it.
pub async fn store_with_group(id: &str, name: &str) -> Store {
    let store = Store::open(":memory:").await.unwrap();
    store
        .upsert_group(&Group {
            id: id.to_string(),
            name: name.to_string(),
            category: "implementation".to_string(),
            ..Group::default()
        })
        .await
        .unwrap();
    store
}
