//! The orchestration core: turn loop, policy, confirmations, tool execution
//! and context compression.

pub mod compressor;
pub mod confirmation;
pub mod error;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod policy;
pub mod prompt;
pub mod registry;
pub mod risk;
pub mod scheduler;
pub mod truncate;

#[cfg(test)]
pub(crate) mod testing;

pub use compressor::{CompressorConfig, ContextCompressor};
pub use confirmation::{ConfirmationBroker, ConfirmationOutcome, PendingConfirmation};
pub use error::EngineError;
pub use events::{EventBus, EventSubscriber};
pub use executor::{PreparedCall, ToolExecutor};
pub use orchestrator::{AgentConfig, Orchestrator};
pub use policy::PolicyEngine;
pub use prompt::{ContextGenerator, PromptBuilder};
pub use registry::ToolRegistry;
pub use risk::{RiskAssessor, RiskLevel};
pub use scheduler::ToolScheduler;
