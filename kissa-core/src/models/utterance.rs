use serde::{Deserialize, Serialize};

/// Who produced an utterance. Stored as the lowercase text `user` / `ai`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "ai" => Ok(Role::Ai),
            other => Err(format!("unknown utterance role: {}", other)),
        }
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Ai => "ai",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Utterance {
    pub id: i64,
    pub subject_id: i64,
    pub role: String,
    pub content: String,
    pub turn: i64,
}

impl Utterance {
    pub fn role(&self) -> Result<Role, String> {
        Role::try_from(self.role.as_str())
    }
}
