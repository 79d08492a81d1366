//! Single-resident model lifecycle management.
//!
//! At most one backend model is resident at a time. Before an agent
//! speaks, `ensure` hot-swaps the resident model to that agent's
//! assignment: best-effort unload, then a classified retry loop around the
//! load. The resident slot lives behind a mutex held for the whole swap,
//! so overlapping `ensure` calls queue instead of interleaving.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::LifecycleConfig;
use crate::error::{Error, FailureClass, Result};

/// Human-readable swap progress for UI consumption. Advisory only; never
/// affects control flow.
#[derive(Debug, Clone)]
pub struct SwapProgress {
    pub text: String,
    /// Fraction in `0..=1`.
    pub progress: f32,
}

pub type ProgressCallback = Arc<dyn Fn(SwapProgress) + Send + Sync>;

/// Backend collaborator that actually loads and unloads models.
#[async_trait]
pub trait ModelHost: Send + Sync {
    /// Load `model_id`, reporting fractional progress through `on_progress`.
    async fn load(&self, model_id: &str, on_progress: ProgressCallback) -> Result<()>;

    /// Release the resident model.
    async fn unload(&self) -> Result<()>;

    /// Drop locally cached model artifacts, used to recover from corrupt
    /// cache state before a retry.
    async fn clear_cache(&self) -> Result<()>;
}

/// The single resident-model slot. Never holds two models; transitions are
/// strictly sequential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResidentModel {
    Absent,
    Loading(String),
    Ready(String),
}

impl ResidentModel {
    fn model_id(&self) -> Option<&str> {
        match self {
            Self::Absent => None,
            Self::Loading(id) | Self::Ready(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentModelAssignment {
    pub agent_id: String,
    pub model_id: String,
}

pub struct ModelLifecycleManager {
    host: Arc<dyn ModelHost>,
    config: LifecycleConfig,
    assignments: RwLock<HashMap<String, String>>,
    /// Held across the whole swap; overlapping `ensure` calls queue here.
    resident: Mutex<ResidentModel>,
    on_progress: Option<ProgressCallback>,
}

impl ModelLifecycleManager {
    pub fn new(host: Arc<dyn ModelHost>, config: LifecycleConfig) -> Self {
        Self {
            host,
            config,
            assignments: RwLock::new(HashMap::new()),
            resident: Mutex::new(ResidentModel::Absent),
            on_progress: None,
        }
    }

    pub fn with_progress(
        host: Arc<dyn ModelHost>,
        config: LifecycleConfig,
        on_progress: ProgressCallback,
    ) -> Self {
        Self {
            on_progress: Some(on_progress),
            ..Self::new(host, config)
        }
    }

    /// Set or update the model for an agent. Takes effect on the next
    /// `ensure` for that agent; the current residency is untouched.
    pub async fn assign(&self, agent_id: &str, model_id: &str) {
        info!("Assigning model '{model_id}' to agent '{agent_id}'");
        self.assignments
            .write()
            .await
            .insert(agent_id.to_string(), model_id.to_string());
    }

    pub async fn assignment_for(&self, agent_id: &str) -> Option<String> {
        self.assignments.read().await.get(agent_id).cloned()
    }

    pub async fn assignments(&self) -> Vec<AgentModelAssignment> {
        self.assignments
            .read()
            .await
            .iter()
            .map(|(agent_id, model_id)| AgentModelAssignment {
                agent_id: agent_id.clone(),
                model_id: model_id.clone(),
            })
            .collect()
    }

    /// The currently ready model, if any.
    pub async fn resident_model(&self) -> Option<String> {
        match &*self.resident.lock().await {
            ResidentModel::Ready(id) => Some(id.clone()),
            _ => None,
        }
    }

    /// Make sure the agent's assigned model is resident and ready.
    ///
    /// No-op when the right model is already resident. Otherwise the
    /// previous model is unloaded (best effort, failures only logged) and
    /// the target loaded with classified retries. On failure the slot is
    /// left `Absent`, never half-ready.
    pub async fn ensure(&self, agent_id: &str) -> Result<()> {
        let target = match self.assignment_for(agent_id).await {
            Some(id) => id,
            None => {
                warn!("No model assigned to agent '{agent_id}'");
                return Ok(());
            }
        };
        if target.trim().is_empty() {
            return Err(Error::InvalidModelId(target));
        }

        let mut resident = self.resident.lock().await;
        if matches!(&*resident, ResidentModel::Ready(current) if *current == target) {
            debug!("Model '{target}' already resident for '{agent_id}', skipping swap");
            return Ok(());
        }

        if let Some(leaving) = resident.model_id() {
            let leaving = leaving.to_string();
            info!("Swapping model for '{agent_id}': {leaving} -> {target}");
            self.report(format!("Unloading {leaving}..."), 0.1);
            if let Err(err) = self.host.unload().await {
                warn!("Unload of '{leaving}' failed, continuing with swap: {err}");
            }
            *resident = ResidentModel::Absent;
        } else {
            info!("Loading model '{target}' for '{agent_id}'");
        }

        *resident = ResidentModel::Loading(target.clone());
        self.report(format!("Loading {target}..."), 0.3);

        match self.load_with_retry(&target).await {
            Ok(()) => {
                *resident = ResidentModel::Ready(target.clone());
                self.report(format!("Model {target} loaded"), 1.0);
                Ok(())
            }
            Err(err) => {
                *resident = ResidentModel::Absent;
                Err(err)
            }
        }
    }

    async fn load_with_retry(&self, model_id: &str) -> Result<()> {
        let max_attempts = self.config.max_load_attempts.max(1);
        let base_delay = Duration::from_millis(self.config.base_retry_delay_ms);
        let mut last_class = FailureClass::Other;
        let mut last_message = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                info!("Retry attempt {attempt}/{max_attempts} for model '{model_id}'");
            }

            match self.host.load(model_id, self.scaled_progress()).await {
                Ok(()) => {
                    info!("Model '{model_id}' loaded after {attempt} attempt(s)");
                    return Ok(());
                }
                Err(err) => {
                    let message = err.to_string();
                    let class = FailureClass::classify(&message);
                    warn!(
                        "Failed to load model '{model_id}' \
                         (attempt {attempt}/{max_attempts}, {class}): {message}"
                    );
                    last_class = class;
                    last_message = message;

                    if attempt == max_attempts {
                        break;
                    }

                    let delay = match class {
                        FailureClass::CacheNetwork => {
                            // Recover from a corrupt cache before the retry.
                            if let Err(cache_err) = self.host.clear_cache().await {
                                warn!("Cache clear failed: {cache_err}");
                            }
                            base_delay * 2u32.pow(attempt - 1)
                        }
                        FailureClass::Other => base_delay * attempt,
                    };
                    debug!("Waiting {delay:?} before retry");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(Error::RetriesExhausted {
            model_id: model_id.to_string(),
            attempts: max_attempts,
            class: last_class,
            message: last_message,
            remediation: remediation_for(last_class),
        })
    }

    fn report(&self, text: String, progress: f32) {
        if let Some(cb) = &self.on_progress {
            cb(SwapProgress { text, progress });
        }
    }

    /// Backend load progress rescaled into the 0.3..0.9 band of the swap.
    fn scaled_progress(&self) -> ProgressCallback {
        match &self.on_progress {
            Some(cb) => {
                let cb = cb.clone();
                Arc::new(move |p: SwapProgress| {
                    cb(SwapProgress {
                        text: p.text,
                        progress: 0.3 + p.progress.clamp(0.0, 1.0) * 0.6,
                    })
                })
            }
            None => Arc::new(|_| {}),
        }
    }
}

fn remediation_for(class: FailureClass) -> String {
    match class {
        FailureClass::CacheNetwork => "This appears to be a cache/network error. Suggestions:\n\
             - Check your network connection and try again\n\
             - Clear the local model cache and re-download\n\
             - Try a smaller model variant\n\
             - Verify the model artifact URLs are reachable\n\
             - Check that there is enough disk space for model caching"
            .to_string(),
        FailureClass::Other => "Check that the model id is registered with the backend and that \
             its required artifacts are present and reachable."
            .to_string(),
    }
}
