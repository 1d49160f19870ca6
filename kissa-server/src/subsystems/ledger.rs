//! Turn ledger: in-progress conversations keyed by subject
//!
//! Each inbound message is routed to its subject's session: created on first
//! contact, advanced once per message, and flushed to the archive (and handed
//! to the spreadsheet exporter) the moment the engine emits the end marker or
//! the turn limit is reached. Completed sessions are removed; the next message
//! under the same name starts over.
//!
//! Access to one subject is serialised by a per-session async mutex, so two
//! concurrent messages for the same name are processed one after the other.
//! Different subjects never contend beyond the brief map lookup.

use std::collections::HashMap;
use std::sync::Arc;

use kissa_core::engine::{DialogueEngine, DialogueSession, EngineError};
use kissa_core::models::Conversation;
use kissa_core::persona;
use kissa_core::sheets::ConversationExporter;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::subsystems::archive::ConversationArchive;
use crate::subsystems::export;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Engine call failed: {0}")]
    Engine(#[from] EngineError),

    #[error("Archiving conversation failed: {0}")]
    Archive(#[source] anyhow::Error),
}

/// Result of processing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply: String,
    pub ended: bool,
}

/// Read-only view of an in-progress session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub turn_count: u32,
    pub user_utterances: Vec<String>,
    pub ai_utterances: Vec<String>,
}

struct SessionRecord {
    dialogue: Box<dyn DialogueSession>,
    user_utterances: Vec<String>,
    ai_utterances: Vec<String>,
    turn_count: u32,
    /// Stop condition fired but archival failed; retried on the next message.
    awaiting_archive: bool,
    /// Removed from the ledger; waiters must look the subject up again.
    closed: bool,
}

impl SessionRecord {
    fn new(dialogue: Box<dyn DialogueSession>) -> Self {
        Self {
            dialogue,
            user_utterances: Vec::new(),
            ai_utterances: Vec::new(),
            turn_count: 0,
            awaiting_archive: false,
            closed: false,
        }
    }

    fn record_turn(&mut self, message: &str, reply: &str) {
        self.user_utterances.push(message.to_string());
        self.ai_utterances.push(reply.to_string());
        self.turn_count += 1;
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            turn_count: self.turn_count,
            user_utterances: self.user_utterances.clone(),
            ai_utterances: self.ai_utterances.clone(),
        }
    }
}

type SharedRecord = Arc<Mutex<SessionRecord>>;

pub struct TurnLedger {
    engine: Arc<dyn DialogueEngine>,
    archive: ConversationArchive,
    exporter: Arc<dyn ConversationExporter>,
    turn_limit: u32,
    sessions: Mutex<HashMap<String, SharedRecord>>,
}

impl TurnLedger {
    pub fn new(
        engine: Arc<dyn DialogueEngine>,
        archive: ConversationArchive,
        exporter: Arc<dyn ConversationExporter>,
        turn_limit: u32,
    ) -> Self {
        Self {
            engine,
            archive,
            exporter,
            turn_limit,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn turn_limit(&self) -> u32 {
        self.turn_limit
    }

    /// Process one message for `subject_key` and report whether the
    /// conversation ended with it.
    pub async fn process_message(
        &self,
        subject_key: &str,
        message: &str,
    ) -> Result<TurnOutcome, LedgerError> {
        loop {
            let shared = self.fetch_or_create(subject_key).await;
            let mut record = shared.lock().await;

            // Completed by a concurrent request while we waited.
            if record.closed {
                continue;
            }

            let reply = record.dialogue.advance(message).await?;
            record.record_turn(message, &reply);

            let ended = record.awaiting_archive
                || persona::signals_end(&reply)
                || record.turn_count >= self.turn_limit;

            tracing::debug!(
                subject = %subject_key,
                turn = record.turn_count,
                ended = ended,
                "Processed turn"
            );

            if ended {
                self.complete(subject_key, &shared, &mut record).await?;
            }

            return Ok(TurnOutcome { reply, ended });
        }
    }

    async fn fetch_or_create(&self, subject_key: &str) -> SharedRecord {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(subject_key.to_string())
            .or_insert_with(|| {
                tracing::info!(subject = %subject_key, engine = self.engine.name(), "Starting conversation");
                Arc::new(Mutex::new(SessionRecord::new(self.engine.open_session())))
            })
            .clone()
    }

    /// Archive, schedule the export, and drop the session from the ledger.
    async fn complete(
        &self,
        subject_key: &str,
        shared: &SharedRecord,
        record: &mut SessionRecord,
    ) -> Result<(), LedgerError> {
        let conversation = Conversation {
            name: subject_key.to_string(),
            user_utterances: record.user_utterances.clone(),
            ai_utterances: record.ai_utterances.clone(),
        };

        if let Err(e) = self.archive.save_conversation(&conversation).await {
            record.awaiting_archive = true;
            tracing::error!(
                subject = %subject_key,
                turn = record.turn_count,
                error = %e,
                "Failed to archive completed conversation; session retained"
            );
            return Err(LedgerError::Archive(e));
        }

        export::spawn_export_task(self.exporter.clone(), conversation);

        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(subject_key)
            .is_some_and(|current| Arc::ptr_eq(current, shared))
        {
            sessions.remove(subject_key);
        }
        record.closed = true;

        tracing::info!(
            subject = %subject_key,
            turns = record.turn_count,
            "Conversation saved and session ended"
        );

        Ok(())
    }

    /// Current state of `subject_key`'s session, if one is in progress.
    pub async fn snapshot(&self, subject_key: &str) -> Option<SessionSnapshot> {
        let shared = self.sessions.lock().await.get(subject_key).cloned()?;
        let record = shared.lock().await;
        Some(record.snapshot())
    }

    pub async fn contains(&self, subject_key: &str) -> bool {
        self.sessions.lock().await.contains_key(subject_key)
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
