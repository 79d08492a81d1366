//! The builtin demo troupe.

use troupe_core::Agent;

pub struct TroupeMember {
    pub agent: Agent,
    pub model_id: String,
    pub voice_id: String,
}

/// Three characters with contrasting personas and sampling parameters,
/// each on its own model and voice.
pub fn builtin_troupe() -> Vec<TroupeMember> {
    vec![
        TroupeMember {
            agent: Agent::new(
                "comedian",
                "The Comedian",
                "You are a witty comedian who loves to make jokes and puns. \
                 Keep responses brief and humorous.",
                0.9,
                0.95,
                "#ff6b6b",
            ),
            model_id: "llama-3.2-1b-instruct-q4".to_string(),
            voice_id: "ember".to_string(),
        },
        TroupeMember {
            agent: Agent::new(
                "philosopher",
                "The Philosopher",
                "You are a thoughtful philosopher who provides deep insights. \
                 Keep responses brief and profound.",
                0.7,
                0.9,
                "#4ecdc4",
            ),
            model_id: "qwen3-0.6b-4bit".to_string(),
            voice_id: "sage".to_string(),
        },
        TroupeMember {
            agent: Agent::new(
                "scientist",
                "The Scientist",
                "You are a logical scientist who explains things clearly and \
                 factually. Keep responses brief and precise.",
                0.3,
                0.85,
                "#45b7d1",
            ),
            model_id: "smollm2-360m-instruct".to_string(),
            voice_id: "default".to_string(),
        },
    ]
}
