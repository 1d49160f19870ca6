//! Archive subsystem: durable transcript storage
//!
//! One `subjects` row per completed conversation, one `utterances` row per
//! user line and per engine line, numbered by turn from 1.

use kissa_core::models::{Conversation, Role, Subject, Utterance};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct ConversationArchive {
    pool: SqlitePool,
}

impl ConversationArchive {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Store one completed conversation and return the new subject id.
    ///
    /// Subject and utterances commit together; on error nothing is visible.
    pub async fn save_conversation(&self, conversation: &Conversation) -> anyhow::Result<i64> {
        let mut tx = self.pool.begin().await?;

        let subject_id = sqlx::query("INSERT INTO subjects (name) VALUES (?)")
            .bind(&conversation.name)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        let turns = conversation
            .user_utterances
            .iter()
            .zip(conversation.ai_utterances.iter());

        for (index, (user_line, ai_line)) in turns.enumerate() {
            let turn = index as i64 + 1;
            for (role, content) in [(Role::User, user_line), (Role::Ai, ai_line)] {
                sqlx::query(
                    "INSERT INTO utterances (subject_id, role, content, turn) VALUES (?, ?, ?, ?)",
                )
                .bind(subject_id)
                .bind(role.as_str())
                .bind(content)
                .bind(turn)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            subject_id = subject_id,
            subject = %conversation.name,
            turns = conversation.turns(),
            "Archived conversation"
        );

        Ok(subject_id)
    }

    /// Every archived subject with its utterances split back into the two
    /// parallel sequences, ordered by subject id then turn.
    pub async fn list_conversations(&self) -> anyhow::Result<Vec<Conversation>> {
        let subjects: Vec<Subject> = sqlx::query_as("SELECT id, name FROM subjects ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let utterances: Vec<Utterance> = sqlx::query_as(
            "SELECT id, subject_id, role, content, turn FROM utterances
             ORDER BY subject_id, turn, role",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut conversations: Vec<Conversation> = Vec::with_capacity(subjects.len());
        let mut rows = utterances.into_iter().peekable();

        for subject in subjects {
            let mut conversation = Conversation {
                name: subject.name,
                user_utterances: Vec::new(),
                ai_utterances: Vec::new(),
            };

            // Skip orphans belonging to ids below this subject.
            while rows.next_if(|u| u.subject_id < subject.id).is_some() {}

            while let Some(utterance) = rows.next_if(|u| u.subject_id == subject.id) {
                match utterance.role() {
                    Ok(Role::User) => conversation.user_utterances.push(utterance.content),
                    Ok(Role::Ai) => conversation.ai_utterances.push(utterance.content),
                    Err(e) => {
                        tracing::warn!(
                            utterance_id = utterance.id,
                            subject_id = utterance.subject_id,
                            error = %e,
                            "Skipping utterance with unrecognised role"
                        );
                    }
                }
            }

            conversations.push(conversation);
        }

        Ok(conversations)
    }

    pub async fn count_subjects(&self) -> anyhow::Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subjects")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kissa_core::config::DatabaseConfig;

    async fn memory_archive() -> ConversationArchive {
        let pool = kissa_core::db::create_pool(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
        .expect("Failed to open in-memory sqlite");
        kissa_core::db::init_schema(&pool).await.unwrap();
        ConversationArchive::new(pool)
    }

    fn conversation(name: &str, users: &[&str], ais: &[&str]) -> Conversation {
        Conversation {
            name: name.to_string(),
            user_utterances: users.iter().map(|s| s.to_string()).collect(),
            ai_utterances: ais.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order() {
        let archive = memory_archive().await;
        archive
            .save_conversation(&conversation("alice", &["u1", "u2"], &["a1", "a2"]))
            .await
            .unwrap();

        let all = archive.list_conversations().await.unwrap();
        assert_eq!(all, vec![conversation("alice", &["u1", "u2"], &["a1", "a2"])]);
    }

    #[tokio::test]
    async fn test_rows_numbered_by_turn_and_role() {
        let archive = memory_archive().await;
        let id = archive
            .save_conversation(&conversation("bob", &["hi", "bye"], &["hello", "see you"]))
            .await
            .unwrap();

        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT role, content, turn FROM utterances WHERE subject_id = ? ORDER BY turn, role DESC",
        )
        .bind(id)
        .fetch_all(archive.pool())
        .await
        .unwrap();

        assert_eq!(
            rows,
            vec![
                ("user".to_string(), "hi".to_string(), 1),
                ("ai".to_string(), "hello".to_string(), 1),
                ("user".to_string(), "bye".to_string(), 2),
                ("ai".to_string(), "see you".to_string(), 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_lists_every_subject_including_repeated_names() {
        let archive = memory_archive().await;
        archive
            .save_conversation(&conversation("alice", &["first"], &["r1"]))
            .await
            .unwrap();
        archive
            .save_conversation(&conversation("carol", &["x", "y", "z"], &["1", "2", "3"]))
            .await
            .unwrap();
        archive
            .save_conversation(&conversation("alice", &["again"], &["r2"]))
            .await
            .unwrap();

        let all = archive.list_conversations().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], conversation("alice", &["first"], &["r1"]));
        assert_eq!(all[1], conversation("carol", &["x", "y", "z"], &["1", "2", "3"]));
        assert_eq!(all[2], conversation("alice", &["again"], &["r2"]));
        assert_eq!(archive.count_subjects().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_empty_archive_lists_nothing() {
        let archive = memory_archive().await;
        assert!(archive.list_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_role_rows_are_skipped() {
        let archive = memory_archive().await;
        let id = archive
            .save_conversation(&conversation("erin", &["u1"], &["a1"]))
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO utterances (subject_id, role, content, turn) VALUES (?, 'narrator', 'stray', 2)",
        )
        .bind(id)
        .execute(archive.pool())
        .await
        .unwrap();

        let all = archive.list_conversations().await.unwrap();
        assert_eq!(all, vec![conversation("erin", &["u1"], &["a1"])]);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_nothing_behind() {
        let archive = memory_archive().await;
        sqlx::query("DROP TABLE utterances")
            .execute(archive.pool())
            .await
            .unwrap();

        let result = archive
            .save_conversation(&conversation("dave", &["u"], &["a"]))
            .await;
        assert!(result.is_err());

        assert_eq!(archive.count_subjects().await.unwrap(), 0);
    }
}
