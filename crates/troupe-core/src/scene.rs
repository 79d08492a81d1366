//! Improv scene direction.
//!
//! The director runs the full per-turn control flow: make sure the
//! speaker's model is resident, stream the turn while fanning finished
//! units out to observers and the speech pipeline, then hold the turn
//! barrier until the audio has fully played before the next speaker
//! starts. Stopping is cooperative: the flag is checked between turns,
//! and in-flight work simply has its results discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::config::SceneConfig;
use crate::dialogue::{DialogueEngine, TurnOptions};
use crate::error::Result;
use crate::lifecycle::ModelLifecycleManager;
use crate::speech::SpeechPipeline;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovScene {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub suggested_topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SceneEvent {
    TurnStarted {
        turn: usize,
        agent_id: String,
        agent_name: String,
        color: String,
    },
    Unit {
        agent_id: String,
        text: String,
    },
    TurnCompleted {
        turn: usize,
        agent_id: String,
    },
    Critique {
        guidance: String,
    },
    SceneCompleted {
        turns: usize,
    },
}

/// Cooperative stop switch shared between the director and its caller.
#[derive(Debug, Clone, Default)]
pub struct SceneHandle {
    running: Arc<AtomicBool>,
}

impl SceneHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct SceneDirector {
    engine: DialogueEngine,
    lifecycle: Arc<ModelLifecycleManager>,
    pipeline: Arc<SpeechPipeline>,
    config: SceneConfig,
    events: Option<mpsc::UnboundedSender<SceneEvent>>,
    handle: SceneHandle,
}

impl SceneDirector {
    pub fn new(
        engine: DialogueEngine,
        lifecycle: Arc<ModelLifecycleManager>,
        pipeline: Arc<SpeechPipeline>,
        config: SceneConfig,
    ) -> Self {
        Self {
            engine,
            lifecycle,
            pipeline,
            config,
            events: None,
            handle: SceneHandle::default(),
        }
    }

    /// Handle for stopping the scene from elsewhere.
    pub fn handle(&self) -> SceneHandle {
        self.handle.clone()
    }

    /// Subscribe to scene events. Replaces any previous subscription.
    pub fn subscribe_events(&mut self) -> mpsc::UnboundedReceiver<SceneEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn engine(&self) -> &DialogueEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut DialogueEngine {
        &mut self.engine
    }

    /// Run a scene to completion (or until stopped), returning the number
    /// of turns played. Errors stop the scene and clear the pipeline.
    pub async fn run_scene(&mut self, scene: &ImprovScene) -> Result<usize> {
        if self.handle.is_running() {
            warn!("Scene already running");
            return Ok(0);
        }
        self.handle.running.store(true, Ordering::SeqCst);
        self.engine.reset_conversation();
        info!("Starting improv scene: {}", scene.title);

        let mut guidance = String::new();
        let mut turn = 0;
        let result = loop {
            if turn >= self.config.max_turns {
                break Ok(());
            }
            if !self.handle.is_running() {
                info!("Scene stopped after {turn} turns");
                break Ok(());
            }

            let agent = self.engine.current_agent().clone();
            if let Err(err) = self.lifecycle.ensure(&agent.id).await {
                break Err(err);
            }

            let prompt = if turn == 0 {
                opening_prompt(scene)
            } else {
                turn_prompt(scene, &agent, self.engine.agents())
            };

            debug!("[Turn {}] {} speaks", turn + 1, agent.name);
            self.emit(SceneEvent::TurnStarted {
                turn,
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                color: agent.color.clone(),
            });

            let options = TurnOptions {
                hidden_instruction: (!guidance.is_empty()).then(|| guidance.clone()),
                ..Default::default()
            };
            if let Err(err) = self.run_turn(&agent, &prompt, options).await {
                break Err(err);
            }

            self.emit(SceneEvent::TurnCompleted {
                turn,
                agent_id: agent.id.clone(),
            });
            turn += 1;

            if self.config.critique && turn < self.config.max_turns {
                guidance = self.engine.critique_scene().await;
                if !guidance.is_empty() {
                    self.emit(SceneEvent::Critique {
                        guidance: guidance.clone(),
                    });
                }
            }

            if turn < self.config.max_turns && self.handle.is_running() {
                sleep(Duration::from_millis(self.config.turn_delay_ms)).await;
            }
        };

        self.handle.running.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                info!("Scene completed after {turn} turns");
                self.emit(SceneEvent::SceneCompleted { turns: turn });
                Ok(turn)
            }
            Err(err) => {
                self.pipeline.stop().await;
                Err(err)
            }
        }
    }

    /// Drive one turn: stream the generation while prerendering each unit
    /// as it lands, then drain playback and hold the turn barrier.
    async fn run_turn(&mut self, agent: &Agent, prompt: &str, options: TurnOptions) -> Result<()> {
        let pipeline = self.pipeline.clone();
        let events = self.events.clone();
        let agent_id = agent.id.clone();

        let (unit_tx, mut unit_rx) = mpsc::unbounded_channel::<String>();
        let chat = self.engine.chat(
            prompt,
            move |unit| {
                let _ = unit_tx.send(unit.to_string());
            },
            options,
        );
        tokio::pin!(chat);

        // Synthesis starts while the model is still talking; the lookahead
        // bound keeps the two from racing too far ahead.
        let outcome = loop {
            tokio::select! {
                outcome = &mut chat => break outcome,
                Some(unit) = unit_rx.recv() => {
                    emit_event(&events, SceneEvent::Unit {
                        agent_id: agent_id.clone(),
                        text: unit.clone(),
                    });
                    pipeline.prerender(std::slice::from_ref(&unit), &agent_id).await?;
                }
            }
        };
        let outcome = outcome?;

        // Units flushed at stream end land after the future resolves.
        while let Ok(unit) = unit_rx.try_recv() {
            emit_event(
                &events,
                SceneEvent::Unit {
                    agent_id: agent_id.clone(),
                    text: unit.clone(),
                },
            );
            pipeline
                .prerender(std::slice::from_ref(&unit), &agent_id)
                .await?;
        }

        pipeline.drain_all().await?;
        pipeline.wait_until_finished().await;
        debug!("Turn audio complete for '{}'", outcome.agent_id);
        Ok(())
    }

    fn emit(&self, event: SceneEvent) {
        emit_event(&self.events, event);
    }
}

fn emit_event(events: &Option<mpsc::UnboundedSender<SceneEvent>>, event: SceneEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

fn opening_prompt(scene: &ImprovScene) -> String {
    let topics = if scene.suggested_topics.is_empty() {
        String::new()
    } else {
        format!("Topics to explore: {}\n", scene.suggested_topics.join(", "))
    };
    format!(
        "You are participating in an improv comedy scene with other characters.\n\
         Scene: \"{}\"\n\
         Description: {}\n\
         {}\n\
         Start the scene with your character's perspective. Be creative, stay in \
         character, and keep your response brief (2-3 sentences). React naturally \
         to what others say.",
        scene.title, scene.description, topics
    )
}

fn turn_prompt(scene: &ImprovScene, agent: &Agent, all_agents: &[Agent]) -> String {
    let others = all_agents
        .iter()
        .filter(|a| a.id != agent.id)
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(" and ");
    format!(
        "Continue the improv comedy scene about \"{}\".\n\
         You are {} talking with {}.\n\
         Respond naturally to the previous comment, stay in character, and keep \
         your response brief and entertaining (2-3 sentences).\n\
         You can agree, disagree, add humor, or take the scene in a creative \
         direction while staying on theme.",
        scene.title, agent.name, others
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DialogueConfig, LifecycleConfig, SpeechConfig};
    use crate::dialogue::{ChatBackend, ChatRequest};
    use crate::error::Error;
    use crate::lifecycle::{ModelHost, ProgressCallback};
    use crate::speech::{AudioClip, AudioSink, SynthesisOptions, Synthesizer, VoiceStyle};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct RoundRobinBackend {
        responses: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatBackend for RoundRobinBackend {
        async fn stream_chat(
            &self,
            _request: ChatRequest,
        ) -> Result<mpsc::UnboundedReceiver<crate::error::Result<String>>> {
            let mut responses = self.responses.lock().expect("lock");
            let text = if responses.is_empty() {
                "Nothing left to say. ".to_string()
            } else {
                responses.remove(0)
            };
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(Ok(text));
            Ok(rx)
        }

        async fn complete(&self, _request: ChatRequest) -> Result<String> {
            Ok("Flowing. Raise the stakes.".to_string())
        }
    }

    struct InstantHost;

    #[async_trait]
    impl ModelHost for InstantHost {
        async fn load(&self, _model_id: &str, _on_progress: ProgressCallback) -> Result<()> {
            Ok(())
        }
        async fn unload(&self) -> Result<()> {
            Ok(())
        }
        async fn clear_cache(&self) -> Result<()> {
            Ok(())
        }
    }

    struct InstantSynth;

    #[async_trait]
    impl Synthesizer for InstantSynth {
        async fn load_voice(&self, voice_id: &str) -> Result<VoiceStyle> {
            Ok(VoiceStyle {
                voice_id: voice_id.to_string(),
                style_ttl: Vec::new(),
                style_dp: Vec::new(),
            })
        }
        async fn synthesize(
            &self,
            text: &str,
            _style: &VoiceStyle,
            _options: &SynthesisOptions,
        ) -> Result<AudioClip> {
            Ok(AudioClip {
                samples: vec![text.len() as f32],
                sample_rate: 24_000,
            })
        }
    }

    struct CountingSink {
        played: StdMutex<usize>,
    }

    #[async_trait]
    impl AudioSink for CountingSink {
        async fn play(&self, _clip: AudioClip) -> Result<()> {
            *self.played.lock().expect("lock") += 1;
            Ok(())
        }
    }

    fn director(
        max_turns: usize,
        critique: bool,
        turn_delay_ms: u64,
    ) -> (SceneDirector, Arc<CountingSink>) {
        let agents = vec![
            Agent::new("comedian", "The Comedian", "Be funny.", 0.9, 0.95, "#ff6b6b"),
            Agent::new(
                "philosopher",
                "The Philosopher",
                "Be deep.",
                0.7,
                0.9,
                "#4ecdc4",
            ),
        ];
        let mut engine = DialogueEngine::new(agents, DialogueConfig::default()).expect("engine");
        engine.attach_backend(Arc::new(RoundRobinBackend {
            responses: StdMutex::new(vec![
                "What a day at the coffee shop. ".to_string(),
                "Indeed, the beans ponder us back. ".to_string(),
                "Ha! The espresso agrees. ".to_string(),
            ]),
        }));

        let lifecycle = Arc::new(ModelLifecycleManager::new(
            Arc::new(InstantHost),
            LifecycleConfig::default(),
        ));
        let sink = Arc::new(CountingSink {
            played: StdMutex::new(0),
        });
        let pipeline = SpeechPipeline::new(Arc::new(InstantSynth), sink.clone(), {
            SpeechConfig::default()
        });

        let config = SceneConfig {
            max_turns,
            turn_delay_ms,
            critique,
        };
        (
            SceneDirector::new(engine, lifecycle, pipeline, config),
            sink,
        )
    }

    fn scene() -> ImprovScene {
        ImprovScene {
            title: "At the Coffee Shop".to_string(),
            description: "Three friends dissect a suspicious latte.".to_string(),
            suggested_topics: Vec::new(),
        }
    }

    #[tokio::test]
    async fn runs_turns_round_robin_and_plays_every_unit() {
        let (mut director, sink) = director(3, false, 0);
        let mut events = director.subscribe_events();

        let turns = director.run_scene(&scene()).await.expect("scene");
        assert_eq!(turns, 3);
        assert_eq!(*sink.played.lock().expect("lock"), 3);

        let mut speakers = Vec::new();
        let mut completed = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                SceneEvent::TurnStarted { agent_id, .. } => speakers.push(agent_id),
                SceneEvent::SceneCompleted { turns } => completed = turns,
                _ => {}
            }
        }
        assert_eq!(speakers, vec!["comedian", "philosopher", "comedian"]);
        assert_eq!(completed, 3);
    }

    #[tokio::test]
    async fn units_are_emitted_before_turn_completion() {
        let (mut director, _sink) = director(1, false, 0);
        let mut events = director.subscribe_events();
        director.run_scene(&scene()).await.expect("scene");

        let collected: Vec<SceneEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        let unit_idx = collected
            .iter()
            .position(|e| matches!(e, SceneEvent::Unit { .. }))
            .expect("a unit event");
        let complete_idx = collected
            .iter()
            .position(|e| matches!(e, SceneEvent::TurnCompleted { .. }))
            .expect("a completion event");
        assert!(unit_idx < complete_idx);
    }

    #[tokio::test]
    async fn critique_guidance_feeds_the_next_turn() {
        let (mut director, _sink) = director(2, true, 0);
        let mut events = director.subscribe_events();
        director.run_scene(&scene()).await.expect("scene");

        let saw_critique = std::iter::from_fn(|| events.try_recv().ok())
            .any(|e| matches!(e, SceneEvent::Critique { ref guidance } if guidance.contains("Raise the stakes")));
        assert!(saw_critique);
    }

    #[tokio::test]
    async fn stop_handle_ends_the_scene_between_turns() {
        let (mut director, _sink) = director(50, false, 200);
        let handle = director.handle();
        let mut events = director.subscribe_events();

        // Stop as soon as the first turn completes; the director is inside
        // its inter-turn delay, so the flag check at the loop top catches it.
        let stopper = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if matches!(event, SceneEvent::TurnCompleted { .. }) {
                    handle.stop();
                    break;
                }
            }
        });

        let turns = director.run_scene(&scene()).await.expect("scene");
        stopper.await.expect("join");
        assert_eq!(turns, 1);
        assert!(!director.handle().is_running());
    }

    #[tokio::test]
    async fn backend_failure_stops_the_scene_and_propagates() {
        struct FailingBackend;

        #[async_trait]
        impl ChatBackend for FailingBackend {
            async fn stream_chat(
                &self,
                _request: ChatRequest,
            ) -> Result<mpsc::UnboundedReceiver<crate::error::Result<String>>> {
                Err(Error::Backend("generation offline".to_string()))
            }
            async fn complete(&self, _request: ChatRequest) -> Result<String> {
                Err(Error::Backend("generation offline".to_string()))
            }
        }

        let (mut director, _sink) = director(3, false, 0);
        director
            .engine_mut()
            .attach_backend(Arc::new(FailingBackend));

        let result = director.run_scene(&scene()).await;
        assert!(matches!(result, Err(Error::Backend(_))));
        assert!(!director.handle().is_running());
    }
}
