//! Configuration types for the troupe orchestrator.

use serde::{Deserialize, Serialize};

/// Top-level configuration grouping the per-component sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub dialogue: DialogueConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub speech: SpeechConfig,

    #[serde(default)]
    pub scene: SceneConfig,
}

/// Dialogue engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Trailing window of history messages sent to the backend. The full
    /// transcript is retained; only the request is bounded.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,

    /// Hard cap on generated tokens per turn.
    #[serde(default = "default_max_turn_tokens")]
    pub max_turn_tokens: usize,

    /// Stop markers honored by both the backend and the segmenter.
    #[serde(default = "default_stop_markers")]
    pub stop_markers: Vec<String>,

    /// Penalty discouraging the model from repeating itself.
    #[serde(default = "default_presence_penalty")]
    pub presence_penalty: f32,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_history_messages: default_max_history_messages(),
            max_turn_tokens: default_max_turn_tokens(),
            stop_markers: default_stop_markers(),
            presence_penalty: default_presence_penalty(),
        }
    }
}

fn default_max_history_messages() -> usize {
    8
}

fn default_max_turn_tokens() -> usize {
    96
}

fn default_stop_markers() -> Vec<String> {
    vec!["###".to_string(), "Director:".to_string(), "User:".to_string()]
}

fn default_presence_penalty() -> f32 {
    0.6
}

/// Model lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Maximum load attempts before the swap is abandoned.
    #[serde(default = "default_max_load_attempts")]
    pub max_load_attempts: u32,

    /// Base delay between retries, in milliseconds.
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_load_attempts: default_max_load_attempts(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
        }
    }
}

fn default_max_load_attempts() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    1000
}

/// Speech pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Number of upcoming units whose synthesis starts before they are due
    /// for playback.
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,

    /// Playback speed multiplier passed to the synthesizer.
    #[serde(default = "default_speed")]
    pub speed: f32,

    /// Denoising steps passed to the synthesizer.
    #[serde(default = "default_steps")]
    pub steps: u32,

    /// Voice profile used when an agent has no assignment or its profile
    /// fails to load.
    #[serde(default = "default_default_voice")]
    pub default_voice: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            lookahead: default_lookahead(),
            speed: default_speed(),
            steps: default_steps(),
            default_voice: default_default_voice(),
        }
    }
}

fn default_lookahead() -> usize {
    3
}

fn default_speed() -> f32 {
    1.32
}

fn default_steps() -> u32 {
    15
}

fn default_default_voice() -> String {
    "default".to_string()
}

/// Scene director configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Maximum turns per scene.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Pause between turns, in milliseconds.
    #[serde(default = "default_turn_delay_ms")]
    pub turn_delay_ms: u64,

    /// Ask the backend to critique the scene after each turn and feed the
    /// guidance into the next speaker's hidden directive.
    #[serde(default)]
    pub critique: bool,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            turn_delay_ms: default_turn_delay_ms(),
            critique: false,
        }
    }
}

fn default_max_turns() -> usize {
    10
}

fn default_turn_delay_ms() -> u64 {
    1000
}
