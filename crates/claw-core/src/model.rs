use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::ModelError;
use crate::messages::Message;
use crate::tools::ToolDefinition;

/// Stream of text chunks from a streaming generation.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

/// Everything the model sees for one call.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub system_prompt: Option<String>,
    pub temperature: f64,
}

impl ModelRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            system_prompt: None,
            temperature: 0.7,
        }
    }
}

/// The language-model transport. Adapters map this onto a concrete provider
/// API; the core only ever sees [`Message`]s.
///
/// Tool-call ids in the returned message are treated as opaque and must be
/// unique within one response.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &ModelRequest) -> Result<Message, ModelError>;

    /// Streaming variant. Adapters without native streaming get the full
    /// response as a single chunk.
    async fn generate_stream(&self, request: &ModelRequest) -> Result<TextStream, ModelError> {
        let message = self.generate(request).await?;
        let chunks: Vec<Result<String, ModelError>> = message.content.into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
