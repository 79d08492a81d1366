//! Turn-based dialogue engine.
//!
//! Drives one streaming generation per turn for the current agent, feeds
//! the deltas through a per-turn [`SentenceSegmenter`], and hands every
//! cleaned unit to the caller as it completes. History is committed and
//! the turn cursor advanced only when the stream finishes cleanly; a
//! failed turn leaves both untouched.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::config::DialogueConfig;
use crate::error::{Error, Result};
use crate::history::{ChatMessage, ConversationHistory};
use crate::segment::SentenceSegmenter;

/// Tone directive merged into every system message. Runtime-settable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneLevel {
    Family,
    Casual,
    #[default]
    Gritty,
    Uncensored,
}

impl ToneLevel {
    pub fn instruction(self) -> &'static str {
        match self {
            Self::Family => "Keep it family-friendly. No swearing.",
            Self::Casual => "Mild language OK (damn, hell). No strong profanity.",
            Self::Gritty => "Casual swearing OK. No sexual/violent content.",
            Self::Uncensored => "Full language freedom. No sexual/violent content.",
        }
    }
}

/// One generation request to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
    /// Stop markers; generation terminates when one is produced.
    pub stop: Vec<String>,
    pub presence_penalty: Option<f32>,
    /// Reproducibility seed.
    pub seed: Option<u64>,
}

/// Streaming generation collaborator.
///
/// Deltas arrive on the returned channel; the channel closing is the
/// terminal signal. A mid-stream failure is delivered as an `Err` item.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::UnboundedReceiver<Result<String>>>;

    /// One-shot, non-streaming generation.
    async fn complete(&self, request: ChatRequest) -> Result<String>;
}

/// Per-turn options.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// Token budget for the turn; clamped to the configured cap.
    pub max_tokens: Option<usize>,
    pub seed: Option<u64>,
    /// Extra directive appended to the system message for this turn only,
    /// never surfaced in the transcript.
    pub hidden_instruction: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub agent_id: String,
    /// The full response as streamed, before cleaning.
    pub raw_response: String,
}

pub struct DialogueEngine {
    agents: Vec<Agent>,
    cursor: usize,
    history: ConversationHistory,
    backend: Option<Arc<dyn ChatBackend>>,
    config: DialogueConfig,
    tone: ToneLevel,
}

impl DialogueEngine {
    pub fn new(agents: Vec<Agent>, config: DialogueConfig) -> Result<Self> {
        if agents.is_empty() {
            return Err(Error::InvalidInput(
                "Dialogue engine needs at least one agent".to_string(),
            ));
        }
        Ok(Self {
            agents,
            cursor: 0,
            history: ConversationHistory::default(),
            backend: None,
            config,
            tone: ToneLevel::default(),
        })
    }

    pub fn attach_backend(&mut self, backend: Arc<dyn ChatBackend>) {
        self.backend = Some(backend);
    }

    pub fn set_tone(&mut self, tone: ToneLevel) {
        debug!("Tone level set to {tone:?}");
        self.tone = tone;
    }

    pub fn tone(&self) -> ToneLevel {
        self.tone
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// The agent whose turn it is. Does not advance the cursor.
    pub fn current_agent(&self) -> &Agent {
        &self.agents[self.cursor]
    }

    /// The agent after the current one, round-robin.
    pub fn next_agent(&self) -> &Agent {
        &self.agents[(self.cursor + 1) % self.agents.len()]
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn reset_conversation(&mut self) {
        self.history.clear();
        self.cursor = 0;
    }

    /// Run one turn for the current agent.
    ///
    /// `on_unit` receives every cleaned sentence unit in emission order.
    /// On success the cleaned response is committed to history and the
    /// cursor advances; on failure neither happens.
    pub async fn chat<F>(
        &mut self,
        input_text: &str,
        mut on_unit: F,
        options: TurnOptions,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&str),
    {
        let backend = self.backend.clone().ok_or(Error::NotInitialized)?;
        let agent = self.current_agent().clone();

        let mut system = format!("{}\n\n{}", agent.persona, self.tone.instruction());
        if let Some(hidden) = options
            .hidden_instruction
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            system.push_str("\n\n");
            system.push_str(hidden);
        }

        // Staged, not committed: history is only touched once the stream
        // completes cleanly.
        let user_message = ChatMessage::user(input_text);

        let window = self.config.max_history_messages;
        let mut recent: Vec<ChatMessage> = self.history.messages().to_vec();
        recent.push(user_message.clone());
        let start = recent.len().saturating_sub(window);

        let mut messages = Vec::with_capacity(window + 1);
        messages.push(ChatMessage::system(system));
        messages.extend_from_slice(&recent[start..]);

        let max_tokens = options
            .max_tokens
            .unwrap_or(self.config.max_turn_tokens)
            .min(self.config.max_turn_tokens);

        let request = ChatRequest {
            messages,
            temperature: agent.temperature,
            top_p: agent.top_p,
            max_tokens,
            stop: self.config.stop_markers.clone(),
            presence_penalty: Some(self.config.presence_penalty),
            seed: options.seed,
        };

        let mut segmenter = SentenceSegmenter::new(
            self.config.stop_markers.clone(),
            agent.name.clone(),
            agent.id.clone(),
        );
        let mut raw_response = String::new();

        let mut deltas = backend.stream_chat(request).await?;
        while let Some(delta) = deltas.recv().await {
            let delta = delta?;
            if delta.is_empty() {
                continue;
            }
            raw_response.push_str(&delta);
            for unit in segmenter.feed(&delta) {
                on_unit(&unit);
            }
        }
        if let Some(unit) = segmenter.finish() {
            on_unit(&unit);
        }

        // Name echoes and markers must not re-enter the prompt window.
        let cleaned = segmenter.clean(&raw_response);

        self.history.push(user_message);
        self.history.push(ChatMessage::assistant(cleaned));
        self.cursor = (self.cursor + 1) % self.agents.len();
        debug!(
            "Turn complete for '{}', next speaker '{}'",
            agent.id,
            self.agents[self.cursor].id
        );

        Ok(TurnOutcome {
            agent_id: agent.id,
            raw_response,
        })
    }

    /// Ask the backend whether the scene is flowing or stagnant, plus one
    /// sentence of guidance for the next speaker. Failures are non-fatal
    /// and yield an empty string.
    pub async fn critique_scene(&self) -> String {
        let Some(backend) = self.backend.clone() else {
            return String::new();
        };
        let recent = self.history.tail(4);
        if recent.is_empty() {
            return String::new();
        }

        let transcript: Vec<String> = recent
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect();

        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(
                    "You are an improv director. Say in one word whether the scene is \
                     flowing or stagnant, then give one short sentence of guidance for \
                     the next speaker.",
                ),
                ChatMessage::user(transcript.join("\n")),
            ],
            temperature: 0.3,
            top_p: 0.9,
            max_tokens: 48,
            stop: self.config.stop_markers.clone(),
            presence_penalty: None,
            seed: None,
        };

        match backend.complete(request).await {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                warn!("Scene critique failed, continuing without guidance: {err}");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ChatRole;
    use std::sync::Mutex as StdMutex;

    fn agents() -> Vec<Agent> {
        vec![
            Agent::new("comedian", "The Comedian", "Be funny.", 0.9, 0.95, "#ff6b6b"),
            Agent::new(
                "philosopher",
                "The Philosopher",
                "Be deep.",
                0.7,
                0.9,
                "#4ecdc4",
            ),
        ]
    }

    /// Backend that streams a scripted list of deltas and records requests.
    struct ScriptedBackend {
        deltas: Vec<Result<String>>,
        requests: StdMutex<Vec<ChatRequest>>,
        completion: Result<String>,
    }

    impl ScriptedBackend {
        fn streaming(deltas: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                deltas,
                requests: StdMutex::new(Vec::new()),
                completion: Ok(String::new()),
            })
        }

        fn completing(completion: Result<String>) -> Arc<Self> {
            Arc::new(Self {
                deltas: Vec::new(),
                requests: StdMutex::new(Vec::new()),
                completion,
            })
        }

        fn last_request(&self) -> ChatRequest {
            self.requests
                .lock()
                .expect("lock")
                .last()
                .expect("a request was made")
                .clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn stream_chat(
            &self,
            request: ChatRequest,
        ) -> Result<mpsc::UnboundedReceiver<Result<String>>> {
            self.requests.lock().expect("lock").push(request);
            let (tx, rx) = mpsc::unbounded_channel();
            for delta in &self.deltas {
                let item = match delta {
                    Ok(text) => Ok(text.clone()),
                    Err(_) => Err(Error::Backend("stream interrupted".to_string())),
                };
                let _ = tx.send(item);
            }
            Ok(rx)
        }

        async fn complete(&self, request: ChatRequest) -> Result<String> {
            self.requests.lock().expect("lock").push(request);
            match &self.completion {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(Error::Backend("completion failed".to_string())),
            }
        }
    }

    fn engine_with(backend: Arc<ScriptedBackend>) -> DialogueEngine {
        let mut engine = DialogueEngine::new(agents(), DialogueConfig::default()).expect("engine");
        engine.attach_backend(backend);
        engine
    }

    #[tokio::test]
    async fn unattached_backend_fails_not_initialized() {
        let mut engine = DialogueEngine::new(agents(), DialogueConfig::default()).expect("engine");
        let result = engine.chat("hi", |_| {}, TurnOptions::default()).await;
        assert!(matches!(result, Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn streams_units_and_commits_cleaned_history() {
        let backend = ScriptedBackend::streaming(vec![
            Ok("The Comedian: Hello ".to_string()),
            Ok("there. General ".to_string()),
            Ok("Kenobi!".to_string()),
        ]);
        let mut engine = engine_with(backend.clone());

        let units: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = units.clone();
        let outcome = engine
            .chat(
                "Say hello",
                move |u| sink.lock().expect("lock").push(u.to_string()),
                TurnOptions::default(),
            )
            .await
            .expect("turn succeeds");

        assert_eq!(outcome.agent_id, "comedian");
        assert_eq!(
            outcome.raw_response,
            "The Comedian: Hello there. General Kenobi!"
        );
        assert_eq!(
            *units.lock().expect("lock"),
            vec!["Hello there.", "General Kenobi!"]
        );

        // User message plus cleaned assistant message committed.
        let history = engine.history().messages();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[1].role, ChatRole::Assistant);
        assert_eq!(history[1].content, "Hello there. General Kenobi!");
        assert_eq!(engine.current_agent().id, "philosopher");
    }

    #[tokio::test]
    async fn mid_stream_failure_leaves_history_and_cursor_untouched() {
        let backend = ScriptedBackend::streaming(vec![
            Ok("A fine start. ".to_string()),
            Err(Error::Backend("boom".to_string())),
        ]);
        let mut engine = engine_with(backend);

        let result = engine.chat("go", |_| {}, TurnOptions::default()).await;
        assert!(matches!(result, Err(Error::Backend(_))));
        assert_eq!(engine.history_len(), 0);
        assert_eq!(engine.current_agent().id, "comedian");
    }

    #[tokio::test]
    async fn request_carries_persona_tone_and_sampling_params() {
        let backend = ScriptedBackend::streaming(vec![Ok("Done.".to_string())]);
        let mut engine = engine_with(backend.clone());
        engine.set_tone(ToneLevel::Family);

        engine
            .chat("hi", |_| {}, TurnOptions::default())
            .await
            .expect("turn");

        let request = backend.last_request();
        assert_eq!(request.temperature, 0.9);
        assert_eq!(request.top_p, 0.95);
        assert_eq!(request.max_tokens, 96);
        assert_eq!(request.stop, vec!["###", "Director:", "User:"]);

        let system = &request.messages[0];
        assert_eq!(system.role, ChatRole::System);
        assert!(system.content.contains("Be funny."));
        assert!(system.content.contains("family-friendly"));
    }

    #[tokio::test]
    async fn hidden_instruction_reaches_the_system_message_only() {
        let backend = ScriptedBackend::streaming(vec![Ok("Sure.".to_string())]);
        let mut engine = engine_with(backend.clone());

        engine
            .chat(
                "hi",
                |_| {},
                TurnOptions {
                    hidden_instruction: Some("Wrap up the scene.".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("turn");

        let request = backend.last_request();
        assert!(request.messages[0].content.contains("Wrap up the scene."));
        // The directive is per-turn and never lands in history.
        assert!(engine
            .history()
            .messages()
            .iter()
            .all(|m| !m.content.contains("Wrap up the scene.")));
    }

    #[tokio::test]
    async fn caller_token_budget_is_clamped_to_the_cap() {
        let backend = ScriptedBackend::streaming(vec![Ok("ok.".to_string())]);
        let mut engine = engine_with(backend.clone());

        engine
            .chat(
                "hi",
                |_| {},
                TurnOptions {
                    max_tokens: Some(4096),
                    ..Default::default()
                },
            )
            .await
            .expect("turn");

        assert_eq!(backend.last_request().max_tokens, 96);
    }

    #[tokio::test]
    async fn outgoing_window_is_bounded() {
        let backend = ScriptedBackend::streaming(vec![Ok("ok.".to_string())]);
        let mut engine = engine_with(backend.clone());

        for _ in 0..6 {
            engine
                .chat("again", |_| {}, TurnOptions::default())
                .await
                .expect("turn");
        }

        // 12 retained messages, but the request holds system + window of 8.
        assert_eq!(engine.history_len(), 12);
        assert_eq!(backend.last_request().messages.len(), 1 + 8);
    }

    #[tokio::test]
    async fn cursor_rotates_round_robin() {
        let backend = ScriptedBackend::streaming(vec![Ok("ok.".to_string())]);
        let mut engine = engine_with(backend);

        assert_eq!(engine.current_agent().id, "comedian");
        assert_eq!(engine.next_agent().id, "philosopher");

        engine
            .chat("a", |_| {}, TurnOptions::default())
            .await
            .expect("turn 1");
        assert_eq!(engine.current_agent().id, "philosopher");

        engine
            .chat("b", |_| {}, TurnOptions::default())
            .await
            .expect("turn 2");
        assert_eq!(engine.current_agent().id, "comedian");
    }

    #[tokio::test]
    async fn critique_returns_guidance_text() {
        let backend = ScriptedBackend::completing(Ok(
            "Flowing. Let the philosopher push back harder.".to_string()
        ));
        let mut engine = engine_with(backend);
        engine.history.push(ChatMessage::user("setup"));
        engine.history.push(ChatMessage::assistant("punchline"));

        let guidance = engine.critique_scene().await;
        assert_eq!(guidance, "Flowing. Let the philosopher push back harder.");
    }

    #[tokio::test]
    async fn critique_failure_is_non_fatal() {
        let backend = ScriptedBackend::completing(Err(Error::Backend("down".to_string())));
        let mut engine = engine_with(backend);
        engine.history.push(ChatMessage::user("setup"));

        assert_eq!(engine.critique_scene().await, "");
    }

    #[tokio::test]
    async fn critique_with_empty_history_skips_the_backend() {
        let backend = ScriptedBackend::completing(Ok("unused".to_string()));
        let engine = engine_with(backend.clone());

        assert_eq!(engine.critique_scene().await, "");
        assert!(backend.requests.lock().expect("lock").is_empty());
    }
}
