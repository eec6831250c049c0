use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ordered speaker turns of a synthesized conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationManifest {
    pub turns: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub speaker: String,
    pub clip: PathBuf,
    #[serde(default)]
    pub overlaps: Vec<Overlap>,
}

/// Short interjection laid over the tail of a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Overlap {
    pub speaker: String,
    pub clip: PathBuf,
}

impl ConversationManifest {
    /// Resolve relative clip paths against `base`.
    pub fn resolve_against(mut self, base: &Path) -> Self {
        for turn in &mut self.turns {
            if turn.clip.is_relative() {
                turn.clip = base.join(&turn.clip);
            }
            for overlap in &mut turn.overlaps {
                if overlap.clip.is_relative() {
                    overlap.clip = base.join(&overlap.clip);
                }
            }
        }
        self
    }
}
