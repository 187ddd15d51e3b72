use std::sync::Arc;

use tracing::{debug, info};

use claw_core::errors::ModelError;
use claw_core::messages::{Message, Role};
use claw_core::model::{ModelClient, ModelRequest};
use claw_settings::CompressorSettings;

pub const SUMMARY_HEADER: &str = "## Previous Context Summary";

const SUMMARY_INSTRUCTIONS: &str = "You are a conversation compression assistant.

Summarize the conversation history concisely.

Please provide a concise summary maintaining:
- Key decisions made
- Important context
- Current task state
- Any errors or blockers encountered

Conversation to summarize:
";

#[derive(Clone, Debug)]
pub struct CompressorConfig {
    /// Compress once history holds more than this many messages.
    pub max_messages: usize,
    /// Compress once the estimated token count exceeds this.
    pub max_tokens: usize,
    /// Messages kept verbatim at the end of the history.
    pub keep_recent: usize,
    pub chars_per_token: usize,
    pub summary_temperature: f64,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self::from_settings(&CompressorSettings::default())
    }
}

impl CompressorConfig {
    pub fn from_settings(settings: &CompressorSettings) -> Self {
        Self {
            max_messages: settings.max_messages,
            max_tokens: settings.max_tokens,
            keep_recent: settings.keep_recent,
            chars_per_token: settings.chars_per_token.max(1),
            summary_temperature: settings.summary_temperature,
        }
    }
}

/// Replaces old history with a model-written summary.
pub struct ContextCompressor {
    model: Arc<dyn ModelClient>,
    config: CompressorConfig,
}

impl ContextCompressor {
    pub fn new(model: Arc<dyn ModelClient>, config: CompressorConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    /// Rough token estimate from total character length.
    pub fn estimate_tokens(&self, history: &[Message]) -> usize {
        let chars: usize = history.iter().map(Message::char_len).sum();
        chars / self.config.chars_per_token.max(1)
    }

    pub fn should_compress(&self, history: &[Message]) -> bool {
        history.len() > self.config.max_messages || self.estimate_tokens(history) > self.config.max_tokens
    }

    /// Whether [`compress`](Self::compress) would call the model for this
    /// history.
    pub fn needs_summary(&self, history: &[Message]) -> bool {
        self.split_point(history).is_some()
    }

    /// Where the summarized prefix ends and the verbatim tail begins.
    ///
    /// The tail holds at least `keep_recent` messages and never starts with a
    /// tool result, so every result it keeps stays next to the assistant
    /// message that issued the call. `None` when there is nothing worth
    /// summarizing: no threshold exceeded, an empty prefix, or a prefix that
    /// is only an earlier summary.
    fn split_point(&self, history: &[Message]) -> Option<usize> {
        if !self.should_compress(history) || history.len() <= self.config.keep_recent {
            return None;
        }

        let mut split = history.len() - self.config.keep_recent;
        while split > 0 && history[split].role == Role::Tool {
            split -= 1;
        }

        match &history[..split] {
            [] => None,
            [only] if is_summary(only) => None,
            _ => Some(split),
        }
    }

    /// Summarize everything before the verbatim tail.
    ///
    /// Returns the input unchanged when [`needs_summary`](Self::needs_summary)
    /// is false. Otherwise the result is one system summary message followed
    /// by the tail.
    pub async fn compress(&self, history: Vec<Message>) -> Result<Vec<Message>, ModelError> {
        let Some(split) = self.split_point(&history) else {
            return Ok(history);
        };

        let before = history.len();
        let mut prefix = history;
        let tail = prefix.split_off(split);

        debug!(summarized = prefix.len(), kept = tail.len(), "compressing history");
        let summary = self.summarize(&prefix).await?;

        let mut compacted = Vec::with_capacity(tail.len() + 1);
        compacted.push(Message::system(format!("{SUMMARY_HEADER}\n\n{summary}")));
        compacted.extend(tail);

        info!(before, after = compacted.len(), "history compressed");
        Ok(compacted)
    }

    async fn summarize(&self, messages: &[Message]) -> Result<String, ModelError> {
        let transcript = messages
            .iter()
            .filter(|m| !m.text().is_empty())
            .map(|m| format!("{}: {}", m.role.as_str(), m.text()))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut request = ModelRequest::new(vec![Message::user(format!("{SUMMARY_INSTRUCTIONS}{transcript}"))]);
        request.temperature = self.config.summary_temperature;

        let response = self.model.generate(&request).await?;
        Ok(response.text().to_string())
    }
}

fn is_summary(message: &Message) -> bool {
    message.role == Role::System && message.text().starts_with(SUMMARY_HEADER)
}
