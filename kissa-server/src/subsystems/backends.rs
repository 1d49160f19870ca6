//! Backend factories: build the dialogue engine and spreadsheet exporter
//! from the application config and environment secrets.

use std::sync::Arc;

use kissa_core::engine::{DialogueEngine, EngineError, GeminiChatClient, GeminiChatConfig};
use kissa_core::persona;
use kissa_core::sheets::{ConversationExporter, GoogleSheetsExporter, NoopExporter, ServiceAccountKey};
use kissa_core::KissaConfig;

/// Gemini engine configured from `[engine]` and `GEMINI_API_KEY`.
pub fn create_engine_from_config(config: &KissaConfig) -> anyhow::Result<Arc<dyn DialogueEngine>> {
    let persona_text = persona::load_persona(config.engine.persona_path.as_deref())?;
    let chat_config = GeminiChatConfig::from_engine_config(None, &config.engine, persona_text);

    let client = GeminiChatClient::with_base_url(chat_config, config.engine.base_url.clone())
        .map_err(|e| match e {
            EngineError::MissingApiKey => {
                anyhow::anyhow!("GEMINI_API_KEY is not set; the dialogue engine cannot start")
            }
            other => other.into(),
        })?;

    Ok(Arc::new(client))
}

/// Google Sheets exporter when enabled and `GOOGLE_CREDENTIALS` is present,
/// otherwise the no-op exporter.
pub fn create_exporter_from_config(
    config: &KissaConfig,
) -> anyhow::Result<Arc<dyn ConversationExporter>> {
    if !config.sheets.enabled {
        tracing::info!("Spreadsheet export disabled by config");
        return Ok(Arc::new(NoopExporter));
    }

    match ServiceAccountKey::from_env()? {
        Some(key) => {
            tracing::info!(
                account = %key.client_email,
                spreadsheet = %config.sheets.spreadsheet_id,
                "Spreadsheet export enabled"
            );
            Ok(Arc::new(GoogleSheetsExporter::new(key, &config.sheets)?))
        }
        None => {
            tracing::warn!("GOOGLE_CREDENTIALS not set; completed conversations will not be exported");
            Ok(Arc::new(NoopExporter))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_sheets_uses_noop() {
        let mut config = KissaConfig::default();
        config.sheets.enabled = false;
        let exporter = create_exporter_from_config(&config).unwrap();
        assert_eq!(exporter.name(), "noop");
    }

    #[test]
    fn test_missing_persona_file_is_an_error() {
        let mut config = KissaConfig::default();
        config.engine.persona_path = Some("/nonexistent/persona.md".to_string());
        assert!(create_engine_from_config(&config).is_err());
    }
}
