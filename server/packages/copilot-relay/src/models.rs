use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4.5";

/// Models offered in the settings menu, in display order.
pub const MODELS: &[(&str, &str)] = &[
    ("claude-sonnet-4.5", "Claude Sonnet 4.5 (Default)"),
    ("claude-sonnet-4", "Claude Sonnet 4"),
    ("claude-haiku-4.5", "Claude Haiku 4.5 (Fast)"),
    ("gpt-5", "GPT-5"),
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_known(&self) -> bool {
        MODELS.iter().any(|(id, _)| *id == self.0)
    }

    /// Human readable name; unknown ids are shown as-is.
    pub fn display_name(&self) -> &str {
        MODELS
            .iter()
            .find(|(id, _)| *id == self.0)
            .map(|(_, name)| *name)
            .unwrap_or(self.0.as_str())
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_have_display_names() {
        assert_eq!(ModelId::default().display_name(), "Claude Sonnet 4.5 (Default)");
        assert_eq!(ModelId::new("gpt-5").display_name(), "GPT-5");
        assert!(ModelId::new("claude-haiku-4.5").is_known());
    }

    #[test]
    fn unknown_model_falls_back_to_raw_id() {
        let model = ModelId::new("o4-mini");
        assert!(!model.is_known());
        assert_eq!(model.display_name(), "o4-mini");
    }
}
