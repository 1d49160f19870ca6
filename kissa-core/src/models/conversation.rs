use serde::{Deserialize, Serialize};

/// One subject's transcript as two parallel, turn-ordered sequences.
///
/// This is both the payload handed to the archival sinks on completion and
/// the shape returned by the administrative read-back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub name: String,
    pub user_utterances: Vec<String>,
    pub ai_utterances: Vec<String>,
}

impl Conversation {
    pub fn turns(&self) -> usize {
        self.user_utterances.len().min(self.ai_utterances.len())
    }
}
