use serde::{Deserialize, Serialize};

/// One member of the troupe: identity, persona, and sampling parameters.
///
/// Immutable once handed to the dialogue engine; model and voice
/// assignments live in their respective managers and may change between
/// turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    /// Persona instructions merged into the system message each turn.
    pub persona: String,
    pub temperature: f32,
    pub top_p: f32,
    /// Display color for transcript UIs.
    pub color: String,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        persona: impl Into<String>,
        temperature: f32,
        top_p: f32,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            persona: persona.into(),
            temperature,
            top_p,
            color: color.into(),
        }
    }
}
