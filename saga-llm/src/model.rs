//! The model seam used by the story pipeline, and a scripted test double.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::LlmClient;
use crate::error::LlmError;
use crate::types::{LlmRequest, LlmResponse, ModelRole};

/// Anything that answers an [`LlmRequest`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one request/response exchange.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Whether a backend is configured at all.
    fn is_available(&self) -> bool {
        true
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        LlmClient::generate(self, request).await
    }

    fn is_available(&self) -> bool {
        LlmClient::is_available(self)
    }
}

/// A [`LanguageModel`] that replays queued replies per role.
///
/// Every request is recorded. A role with an empty queue answers with
/// `Unavailable`.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<HashMap<ModelRole, VecDeque<Result<String, LlmError>>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl std::fmt::Debug for ScriptedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedModel")
            .field("recorded", &self.requests.lock().len())
            .finish_non_exhaustive()
    }
}

impl ScriptedModel {
    /// An empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply for `role`.
    pub fn push(&self, role: ModelRole, text: impl Into<String>) -> &Self {
        self.replies
            .lock()
            .entry(role)
            .or_default()
            .push_back(Ok(text.into()));
        self
    }

    /// Queue a failure for `role`.
    pub fn push_error(&self, role: ModelRole, error: LlmError) -> &Self {
        self.replies.lock().entry(role).or_default().push_back(Err(error));
        self
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    /// How many requests `role` has received.
    #[must_use]
    pub fn calls(&self, role: ModelRole) -> usize {
        self.requests.lock().iter().filter(|r| r.role == role).count()
    }

    /// Replies still queued for `role`.
    #[must_use]
    pub fn pending(&self, role: ModelRole) -> usize {
        self.replies.lock().get(&role).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().push(request.clone());
        let next = self
            .replies
            .lock()
            .get_mut(&request.role)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(text)) => Ok(LlmResponse {
                tokens_generated: u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX),
                text,
                latency_ms: 0,
                model: format!("scripted-{}", request.role),
            }),
            Some(Err(e)) => Err(e),
            None => Err(LlmError::Unavailable(format!(
                "no scripted reply left for {}",
                request.role
            ))),
        }
    }
}
