pub mod conversation;
pub mod subject;
pub mod utterance;

pub use conversation::Conversation;
pub use subject::Subject;
pub use utterance::{Role, Utterance};
