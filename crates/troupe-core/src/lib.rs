//! Troupe Core - Turn-Based Spoken Dialogue Orchestration
//!
//! This crate orchestrates a multi-speaker spoken conversation on top of a
//! streaming text-generation backend that can hold only one model resident
//! at a time.
//!
//! # Architecture
//!
//! - [`segment::SentenceSegmenter`] turns streamed text deltas into
//!   cleaned sentence units, with stop markers and speaker-name echoes
//!   stripped.
//! - [`lifecycle::ModelLifecycleManager`] owns the single resident-model
//!   slot and hot-swaps backends per speaker with classified retries.
//! - [`dialogue::DialogueEngine`] rotates speakers round-robin, drives one
//!   streaming generation per turn, and commits history only on success.
//! - [`speech::SpeechPipeline`] prerenders upcoming units and plays them
//!   back strictly in order, never overlapping speakers.
//! - [`scene::SceneDirector`] ties the four together into an improv scene
//!   loop.
//!
//! Generation, synthesis, and audio output are collaborator traits; the
//! crate contains no model or DSP code of its own.

pub mod agent;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod scene;
pub mod segment;
pub mod speech;

pub use agent::Agent;
pub use config::{
    DialogueConfig, LifecycleConfig, OrchestratorConfig, SceneConfig, SpeechConfig,
};
pub use dialogue::{
    ChatBackend, ChatRequest, DialogueEngine, ToneLevel, TurnOptions, TurnOutcome,
};
pub use error::{Error, FailureClass, Result};
pub use history::{ChatMessage, ChatRole, ConversationHistory};
pub use lifecycle::{
    AgentModelAssignment, ModelHost, ModelLifecycleManager, ProgressCallback, ResidentModel,
    SwapProgress,
};
pub use scene::{ImprovScene, SceneDirector, SceneEvent, SceneHandle};
pub use segment::SentenceSegmenter;
pub use speech::{
    AudioClip, AudioSink, SpeechPipeline, SynthesisOptions, Synthesizer, VoiceStyle,
};
