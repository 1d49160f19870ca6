//! Export subsystem: detached spreadsheet export
//!
//! The export runs in `tokio::spawn` after the archival write, never blocks the
//! chat response, and is not retried. Failures are only logged.

use std::sync::Arc;

use kissa_core::models::Conversation;
use kissa_core::sheets::ConversationExporter;

/// Hand `conversation` to `exporter` on a detached task.
pub fn spawn_export_task(exporter: Arc<dyn ConversationExporter>, conversation: Conversation) {
    tokio::spawn(async move {
        match exporter.export(&conversation).await {
            Ok(()) => tracing::info!(
                subject = %conversation.name,
                exporter = exporter.name(),
                "Spreadsheet export completed"
            ),
            Err(e) => tracing::warn!(
                subject = %conversation.name,
                exporter = exporter.name(),
                error = %e,
                "Spreadsheet export failed; row dropped"
            ),
        }
    });
}
