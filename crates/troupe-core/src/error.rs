use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a transient model-load failure, used to pick the
/// recovery strategy before a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Cache-storage or connectivity failure. Local caches are cleared and
    /// the retry delay grows exponentially.
    CacheNetwork,
    /// Anything else. The retry delay grows linearly.
    Other,
}

impl FailureClass {
    /// Classify a load failure by its message, matching the patterns the
    /// generation backends emit for cache and connectivity problems.
    pub fn classify(message: &str) -> Self {
        const CACHE_PATTERNS: [&str; 6] = [
            "cache.add",
            "failed to execute 'add' on 'cache'",
            "networkerror",
            "net::err",
            "failed to fetch",
            "network error",
        ];

        let message = message.to_ascii_lowercase();
        if CACHE_PATTERNS.iter().any(|p| message.contains(p)) {
            Self::CacheNetwork
        } else {
            Self::Other
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CacheNetwork => write!(f, "cache/network"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Engine not initialized. Load a model before starting a turn")]
    NotInitialized,

    #[error("Invalid model id: '{0}'")]
    InvalidModelId(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error(
        "Model '{model_id}' failed to load after {attempts} attempts ({class}): {message}\n{remediation}"
    )]
    RetriesExhausted {
        model_id: String,
        attempts: u32,
        class: FailureClass,
        message: String,
        remediation: String,
    },

    #[error("Generation backend error: {0}")]
    Backend(String),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Voice load failed: {0}")]
    VoiceLoad(String),

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
