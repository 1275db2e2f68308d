//! Optional generative model used to reword answers
//!
//! The session is owned by the service and only becomes usable after an
//! explicit [`ModelSession::initialize`]. Queries never initialize it; an
//! uninitialized session simply means template answers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::render::Rendered;
use super::rules::contains_word;
use crate::config::ModelConfig;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("the language model has not been initialized")]
    NotInitialized,

    #[error("no language model is configured")]
    NotConfigured,

    #[error("language model unavailable: {0}")]
    Unavailable(String),

    #[error("generation failed: {0}")]
    Generation(String),
}

/// Text completion capability
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// One-time setup, potentially slow (loading the model)
    async fn warm_up(&self) -> Result<(), ModelError>;

    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Talks to an Ollama-compatible `/api/generate` endpoint
pub struct HttpGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl HttpGenerator {
    pub fn new(endpoint: &str, model: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/api/generate", endpoint.trim_end_matches('/')),
            model: model.into(),
        })
    }

    pub fn from_config(config: &ModelConfig) -> anyhow::Result<Self> {
        Self::new(
            &config.endpoint,
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    async fn warm_up(&self) -> Result<(), ModelError> {
        // an empty prompt makes Ollama load the model without generating
        self.generate("")
            .await
            .map(|_| ())
            .map_err(|e| ModelError::Unavailable(e.to_string()))
    }

    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let response = self
            .client
            .post(&self.url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ModelError::Generation(e.to_string()))?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Generation(e.to_string()))?;

        Ok(body.response)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    NotInitialized,
    Initializing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelState {
    pub initialized: bool,
    pub status: ModelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitOutcome {
    Initialized,
    AlreadyInitialized,
}

pub struct ModelSession {
    backend: Option<Arc<dyn TextGenerator>>,
    state: RwLock<(ModelStatus, Option<String>)>,
    init_lock: Mutex<()>,
}

impl ModelSession {
    pub fn new(backend: Option<Arc<dyn TextGenerator>>) -> Self {
        Self {
            backend,
            state: RwLock::new((ModelStatus::NotInitialized, None)),
            init_lock: Mutex::new(()),
        }
    }

    /// A session without a model; initialization reports `NotConfigured`.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn state(&self) -> ModelState {
        let (status, message) = self.state.read().clone();
        ModelState {
            initialized: status == ModelStatus::Ready,
            status,
            message,
        }
    }

    /// Warm the model up. Concurrent callers wait for the first one.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<InitOutcome, ModelError> {
        let backend = self.backend.clone().ok_or(ModelError::NotConfigured)?;

        let _guard = self.init_lock.lock().await;
        if self.state.read().0 == ModelStatus::Ready {
            return Ok(InitOutcome::AlreadyInitialized);
        }

        *self.state.write() = (ModelStatus::Initializing, None);
        info!("initializing language model");

        match backend.warm_up().await {
            Ok(()) => {
                *self.state.write() = (ModelStatus::Ready, None);
                info!("language model ready");
                Ok(InitOutcome::Initialized)
            }
            Err(e) => {
                warn!("language model initialization failed: {e}");
                *self.state.write() = (ModelStatus::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    pub fn generator(&self) -> Result<Arc<dyn TextGenerator>, ModelError> {
        if self.state.read().0 != ModelStatus::Ready {
            return Err(ModelError::NotInitialized);
        }
        self.backend.clone().ok_or(ModelError::NotConfigured)
    }

    /// Reword `answer` for `question`. `None` whenever the template should
    /// be used instead: no ready model, a failed call, an empty reply, or a
    /// reply missing any of the answer's facts.
    pub async fn rephrase(&self, question: &str, answer: &Rendered) -> Option<String> {
        let generator = self.generator().ok()?;

        let prompt = format!(
            "Rewrite the answer to the question in one or two friendly sentences. \
             Keep every number, status and timestamp exactly as written.\n\
             Question: {question}\nAnswer: {}\nRewritten answer:",
            answer.text
        );

        let reworded = match generator.generate(&prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("rewording failed, using template: {e}");
                return None;
            }
        };

        if reworded.is_empty() {
            debug!("empty rewording, using template");
            return None;
        }

        if let Some(missing) = answer.facts.iter().find(|f| !contains_word(&reworded, f)) {
            debug!(%missing, "rewording dropped a fact, using template");
            return None;
        }

        Some(reworded)
    }
}
