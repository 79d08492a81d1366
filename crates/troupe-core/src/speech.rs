//! Prerendered, strictly ordered speech playback.
//!
//! Sentence units enter in emission order. Up to `lookahead` synthesis
//! operations run concurrently, each filling its slot in an ordered
//! prerender queue; consumption is positional, so whichever operation
//! finishes first, the head always plays first. Completed clips feed a
//! FIFO playback queue driven by a single task, and `wait_until_finished`
//! is the turn barrier that keeps speakers from overlapping.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SpeechConfig;
use crate::error::{Error, Result};

/// Mono audio samples ready for an output sink.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisOptions {
    pub steps: Option<u32>,
    pub speed: Option<f32>,
    pub seed: Option<u64>,
}

/// Loaded voice-style data, cached per voice id for the session.
#[derive(Debug, Clone)]
pub struct VoiceStyle {
    pub voice_id: String,
    pub style_ttl: Vec<f32>,
    pub style_dp: Vec<f32>,
}

/// Speech synthesis collaborator.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn load_voice(&self, voice_id: &str) -> Result<VoiceStyle>;

    async fn synthesize(
        &self,
        text: &str,
        style: &VoiceStyle,
        options: &SynthesisOptions,
    ) -> Result<AudioClip>;
}

/// Playback collaborator; `play` resolves when the clip has finished.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, clip: AudioClip) -> Result<()>;
}

/// One queued synthesis operation. `result` is filled by the spawned task
/// whenever it completes; draining still happens head-first.
struct PrerenderSlot {
    seq: u64,
    text: String,
    result: Option<Result<AudioClip>>,
}

#[derive(Default)]
struct PipelineState {
    /// Units not yet in flight, as `(text, agent_id)`.
    pending: VecDeque<(String, String)>,
    /// In-flight or completed synthesis, emission order.
    prerender: VecDeque<PrerenderSlot>,
    /// Completed clips awaiting the sink, emission order.
    playback: VecDeque<AudioClip>,
    playing: bool,
    driver: Option<JoinHandle<()>>,
}

/// Internals shared with the spawned synthesis and playback tasks.
struct Shared {
    sink: Arc<dyn AudioSink>,
    state: Mutex<PipelineState>,
    prerender_ready: Notify,
    playback_done: Notify,
}

pub struct SpeechPipeline {
    synthesizer: Arc<dyn Synthesizer>,
    config: SpeechConfig,
    /// Agent id -> voice profile id.
    voices: RwLock<HashMap<String, String>>,
    /// Voice profile id -> loaded style. Populated lazily, never evicted.
    styles: RwLock<HashMap<String, Arc<VoiceStyle>>>,
    next_seq: AtomicU64,
    shared: Arc<Shared>,
}

impl SpeechPipeline {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        sink: Arc<dyn AudioSink>,
        config: SpeechConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            synthesizer,
            config,
            voices: RwLock::new(HashMap::new()),
            styles: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            shared: Arc::new(Shared {
                sink,
                state: Mutex::new(PipelineState::default()),
                prerender_ready: Notify::new(),
                playback_done: Notify::new(),
            }),
        })
    }

    /// Map an agent to a voice profile. Unmapped agents use the default.
    pub async fn assign_voice(&self, agent_id: &str, voice_id: &str) {
        self.voices
            .write()
            .await
            .insert(agent_id.to_string(), voice_id.to_string());
    }

    pub async fn voice_for(&self, agent_id: &str) -> String {
        self.voices
            .read()
            .await
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| self.config.default_voice.clone())
    }

    /// Queue units for synthesis, starting up to `lookahead` of them ahead
    /// of playback. Emission order is preserved end-to-end regardless of
    /// synthesis completion order.
    pub async fn prerender(&self, units: &[String], agent_id: &str) -> Result<()> {
        {
            let mut state = self.shared.state.lock().await;
            for unit in units {
                state
                    .pending
                    .push_back((unit.clone(), agent_id.to_string()));
            }
        }
        self.fill_prerender().await
    }

    /// Await the head of the prerender queue and hand its clip to playback.
    ///
    /// Consumption is positional: the head is awaited even when a later
    /// operation finished first. A failed synthesis still consumes its
    /// queue position; the unit is skipped and ordering holds. Returns
    /// `false` when the queue is empty.
    pub async fn drain_prerendered(&self) -> Result<bool> {
        loop {
            let notified = self.shared.prerender_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let drained = {
                let mut state = self.shared.state.lock().await;
                if state.prerender.is_empty() {
                    return Ok(false);
                }
                if state
                    .prerender
                    .front()
                    .is_some_and(|slot| slot.result.is_some())
                {
                    if let Some(slot) = state.prerender.pop_front() {
                        match slot.result {
                            Some(Ok(clip)) => self.push_playback_locked(&mut state, clip),
                            Some(Err(err)) => {
                                warn!("Synthesis failed for unit '{}', skipping: {err}", slot.text);
                            }
                            None => {}
                        }
                    }
                    true
                } else {
                    false
                }
            };

            if drained {
                self.fill_prerender().await?;
                return Ok(true);
            }
            notified.await;
        }
    }

    /// Drain every queued prerender operation in order.
    pub async fn drain_all(&self) -> Result<()> {
        while self.drain_prerendered().await? {}
        Ok(())
    }

    /// Append a clip to the playback queue; playback starts immediately
    /// when idle and advances automatically as clips complete.
    pub async fn enqueue_playback(&self, clip: AudioClip) {
        let mut state = self.shared.state.lock().await;
        self.push_playback_locked(&mut state, clip);
    }

    /// Turn barrier: resolves once the playback queue is empty and nothing
    /// is playing.
    pub async fn wait_until_finished(&self) {
        loop {
            let notified = self.shared.playback_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.shared.state.lock().await;
                if state.playback.is_empty() && !state.playing {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Clear both queues and halt playback. In-flight synthesis is not
    /// aborted; late results find no slot to land in and are discarded.
    pub async fn stop(&self) {
        let driver = {
            let mut state = self.shared.state.lock().await;
            state.pending.clear();
            state.prerender.clear();
            state.playback.clear();
            state.playing = false;
            state.driver.take()
        };
        if let Some(driver) = driver {
            driver.abort();
        }
        self.shared.prerender_ready.notify_waiters();
        self.shared.playback_done.notify_waiters();
        debug!("Speech pipeline stopped");
    }

    pub async fn prerender_len(&self) -> usize {
        self.shared.state.lock().await.prerender.len()
    }

    /// Start synthesis for pending units while the prerender queue has
    /// room. The pop and the slot push happen under one lock so emission
    /// order survives concurrent callers.
    async fn fill_prerender(&self) -> Result<()> {
        let lookahead = self.config.lookahead.max(1);
        loop {
            let agent_id = {
                let state = self.shared.state.lock().await;
                if state.prerender.len() >= lookahead {
                    return Ok(());
                }
                match state.pending.front() {
                    Some((_, agent)) => agent.clone(),
                    None => return Ok(()),
                }
            };

            // Style resolution may hit the network; do it before touching
            // the queue again.
            let style = self.resolve_style(&agent_id).await?;

            let spawned = {
                let mut state = self.shared.state.lock().await;
                if state.prerender.len() >= lookahead {
                    return Ok(());
                }
                match state.pending.pop_front() {
                    Some((text, agent)) if agent == agent_id => {
                        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                        state.prerender.push_back(PrerenderSlot {
                            seq,
                            text: text.clone(),
                            result: None,
                        });
                        Some((seq, text))
                    }
                    Some(item) => {
                        // Another caller changed the head; re-resolve.
                        state.pending.push_front(item);
                        None
                    }
                    None => return Ok(()),
                }
            };
            let Some((seq, text)) = spawned else {
                continue;
            };

            let shared = self.shared.clone();
            let synthesizer = self.synthesizer.clone();
            let options = SynthesisOptions {
                steps: Some(self.config.steps),
                speed: Some(self.config.speed),
                seed: None,
            };
            tokio::spawn(async move {
                let result = synthesizer.synthesize(&text, &style, &options).await;
                let mut state = shared.state.lock().await;
                if let Some(slot) = state.prerender.iter_mut().find(|s| s.seq == seq) {
                    slot.result = Some(result);
                    shared.prerender_ready.notify_waiters();
                }
                // A missing slot means stop() ran; the result is discarded.
            });
        }
    }

    fn push_playback_locked(&self, state: &mut PipelineState, clip: AudioClip) {
        state.playback.push_back(clip);
        if !state.playing {
            state.playing = true;
            let shared = self.shared.clone();
            state.driver = Some(tokio::spawn(drive_playback(shared)));
        }
    }

    /// Resolve an agent's voice style, loading and caching it on first
    /// use. An unloadable profile falls back to the default; a failing
    /// default is fatal.
    async fn resolve_style(&self, agent_id: &str) -> Result<Arc<VoiceStyle>> {
        let voice_id = self.voice_for(agent_id).await;
        match self.cached_or_load(&voice_id).await {
            Ok(style) => Ok(style),
            Err(err) if voice_id != self.config.default_voice => {
                warn!(
                    "Voice '{voice_id}' unavailable, falling back to '{}': {err}",
                    self.config.default_voice
                );
                self.cached_or_load(&self.config.default_voice).await
            }
            Err(err) => Err(err),
        }
    }

    async fn cached_or_load(&self, voice_id: &str) -> Result<Arc<VoiceStyle>> {
        if let Some(style) = self.styles.read().await.get(voice_id) {
            return Ok(style.clone());
        }
        let style = self
            .synthesizer
            .load_voice(voice_id)
            .await
            .map_err(|err| Error::VoiceLoad(format!("voice '{voice_id}': {err}")))?;
        let style = Arc::new(style);
        self.styles
            .write()
            .await
            .insert(voice_id.to_string(), style.clone());
        debug!("Cached voice style '{voice_id}'");
        Ok(style)
    }
}

async fn drive_playback(shared: Arc<Shared>) {
    loop {
        let clip = {
            let mut state = shared.state.lock().await;
            match state.playback.pop_front() {
                Some(clip) => clip,
                None => {
                    state.playing = false;
                    state.driver = None;
                    shared.playback_done.notify_waiters();
                    return;
                }
            }
        };
        if let Err(err) = shared.sink.play(clip).await {
            warn!("Audio sink rejected clip, skipping: {err}");
        }
        shared.playback_done.notify_waiters();
    }
}
