use std::io::Write;
use std::sync::Arc;

use clap::Args;
use console::{style, Color, Style};
use tracing::info;

use troupe_core::{
    AudioSink, DialogueEngine, ImprovScene, ModelLifecycleManager, OrchestratorConfig,
    SceneConfig, SceneDirector, SceneEvent, SpeechPipeline, SwapProgress, ToneLevel,
};

use crate::http::{HttpChatBackend, HttpModelHost, HttpSynthesizer};
use crate::playback::{NullSink, RodioSink};
use crate::troupe::builtin_troupe;

#[derive(Debug, Args)]
pub struct SceneArgs {
    /// Scene title, e.g. "At the Coffee Shop"
    #[arg(long)]
    pub title: String,

    /// Scene description
    #[arg(long)]
    pub description: String,

    /// Maximum turns to play
    #[arg(long, default_value_t = 10)]
    pub turns: usize,

    /// Ask the backend to critique the scene between turns
    #[arg(long)]
    pub critique: bool,

    /// Family-friendly tone
    #[arg(long)]
    pub family: bool,

    /// Skip audio playback
    #[arg(long)]
    pub mute: bool,
}

pub async fn execute(args: SceneArgs, server: &str) -> anyhow::Result<()> {
    let config = OrchestratorConfig::default();
    let members = builtin_troupe();
    let agents: Vec<_> = members.iter().map(|m| m.agent.clone()).collect();

    let mut engine = DialogueEngine::new(agents, config.dialogue.clone())?;
    engine.attach_backend(Arc::new(HttpChatBackend::new(server)));
    if args.family {
        engine.set_tone(ToneLevel::Family);
    }

    let lifecycle = Arc::new(ModelLifecycleManager::with_progress(
        Arc::new(HttpModelHost::new(server)),
        config.lifecycle.clone(),
        Arc::new(|p: SwapProgress| {
            info!("[{:>3.0}%] {}", p.progress * 100.0, p.text);
        }),
    ));
    for member in &members {
        lifecycle.assign(&member.agent.id, &member.model_id).await;
    }

    let sink: Arc<dyn AudioSink> = if args.mute {
        Arc::new(NullSink)
    } else {
        Arc::new(RodioSink::new()?)
    };
    let pipeline = SpeechPipeline::new(
        Arc::new(HttpSynthesizer::new(server)),
        sink,
        config.speech.clone(),
    );
    for member in &members {
        pipeline
            .assign_voice(&member.agent.id, &member.voice_id)
            .await;
    }

    let scene_config = SceneConfig {
        max_turns: args.turns,
        critique: args.critique,
        ..config.scene
    };
    let mut director = SceneDirector::new(engine, lifecycle, pipeline, scene_config);
    let mut events = director.subscribe_events();

    println!(
        "{} {}",
        style("Starting scene:").bold(),
        style(&args.title).cyan()
    );
    println!("{}\n", args.description);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SceneEvent::TurnStarted {
                    agent_name, color, ..
                } => {
                    print!("\n{} ", agent_style(&color).apply_to(format!("{agent_name}:")));
                    let _ = std::io::stdout().flush();
                }
                SceneEvent::Unit { text, .. } => {
                    print!("{text} ");
                    let _ = std::io::stdout().flush();
                }
                SceneEvent::TurnCompleted { .. } => {
                    println!();
                }
                SceneEvent::Critique { guidance } => {
                    println!("{}", style(format!("  (director: {guidance})")).dim());
                }
                SceneEvent::SceneCompleted { turns } => {
                    println!("\n{}", style(format!("Scene completed after {turns} turns")).green());
                }
            }
        }
    });

    let scene = ImprovScene {
        title: args.title,
        description: args.description,
        suggested_topics: Vec::new(),
    };
    let outcome = director.run_scene(&scene).await;
    drop(director);
    let _ = printer.await;

    outcome?;
    Ok(())
}

/// Map the agent's display color onto the nearest terminal color.
fn agent_style(hex: &str) -> Style {
    let color = match hex {
        "#ff6b6b" => Color::Red,
        "#4ecdc4" => Color::Cyan,
        "#45b7d1" => Color::Blue,
        _ => Color::White,
    };
    Style::new().fg(color).bold()
}
